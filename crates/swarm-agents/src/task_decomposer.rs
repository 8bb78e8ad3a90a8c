//! Task Decomposer — turns a workflow instruction into a child/grandchild
//! ticket tree. One child per relevant worker-type lane (`developer` is
//! always present; `research`/`design`/`test`/`reviewer` are added by
//! [`swarm_core::select_lanes`]), each owning a handful of grandchild
//! tickets carrying the actual acceptance criteria. Ids are derived from a
//! `blake3` digest of the workflow id, lane, and index rather than a
//! random generator, so the same instruction always yields the same tree
//! and re-running decomposition for a workflow is a no-op.

use swarm_core::{ChildLane, ChildTicket, GrandchildTicket, KnowledgeEntry};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DecomposerError {
    #[error("instruction must not be empty")]
    EmptyInstruction,
}

pub type DecomposerResult<T> = Result<T, DecomposerError>;

#[derive(Debug, Clone)]
pub struct Decomposition {
    pub children: Vec<ChildTicket>,
    pub grandchildren: Vec<GrandchildTicket>,
}

#[derive(Debug, Default, Clone)]
pub struct TaskDecomposer;

impl TaskDecomposer {
    pub fn new() -> Self {
        Self
    }

    pub fn decompose(
        &self,
        workflow_id: &str,
        instruction: &str,
        extra_flags: &[ChildLane],
        knowledge: &[KnowledgeEntry],
    ) -> DecomposerResult<Decomposition> {
        if instruction.trim().is_empty() {
            return Err(DecomposerError::EmptyInstruction);
        }

        let lanes = swarm_core::select_lanes(instruction, extra_flags);
        let mut children = Vec::with_capacity(lanes.len());
        let mut grandchildren = Vec::new();

        for (lane_index, lane) in lanes.iter().enumerate() {
            let child_id = deterministic_id(workflow_id, "child", *lane, lane_index, 0);
            let mut child = ChildTicket::new(child_id.clone(), workflow_id, *lane);

            for (gc_index, template) in grandchild_templates(*lane).iter().enumerate() {
                let gc_id = deterministic_id(workflow_id, "gc", *lane, lane_index, gc_index);
                let mut description = format!("{}: {instruction}", template.description_prefix);
                append_relevant_knowledge(&mut description, instruction, *lane, knowledge);

                let grandchild = GrandchildTicket::new(
                    gc_id.clone(),
                    child_id.clone(),
                    *lane,
                    format!("{}: {instruction}", template.title_prefix),
                    description,
                    template.acceptance_criteria.iter().map(|s| s.to_string()).collect(),
                );
                child.grandchild_ids.push(gc_id);
                grandchildren.push(grandchild);
            }

            children.push(child);
        }

        Ok(Decomposition { children, grandchildren })
    }
}

struct GrandchildTemplate {
    title_prefix: &'static str,
    description_prefix: &'static str,
    acceptance_criteria: &'static [&'static str],
}

fn grandchild_templates(lane: ChildLane) -> &'static [GrandchildTemplate] {
    match lane {
        ChildLane::Developer => &[GrandchildTemplate {
            title_prefix: "Implement",
            description_prefix: "Implement the change required by the instruction",
            acceptance_criteria: &[
                "Implementation satisfies the instruction",
                "No regressions in existing behavior",
            ],
        }],
        ChildLane::Research => &[GrandchildTemplate {
            title_prefix: "Research",
            description_prefix: "Investigate approaches and constraints for the instruction",
            acceptance_criteria: &[
                "At least one viable approach identified",
                "Tradeoffs documented for the developer lane",
            ],
        }],
        ChildLane::Design => &[GrandchildTemplate {
            title_prefix: "Design",
            description_prefix: "Produce an interface or architecture for the instruction",
            acceptance_criteria: &[
                "Design covers the instruction's stated scope",
                "Design reviewed for consistency with the existing codebase",
            ],
        }],
        ChildLane::Test => &[GrandchildTemplate {
            title_prefix: "Add tests for",
            description_prefix: "Cover the change required by the instruction with tests",
            acceptance_criteria: &[
                "New tests exercise the golden path and at least one edge case",
                "Tests pass under the Quality Gate",
            ],
        }],
        ChildLane::Reviewer => &[GrandchildTemplate {
            title_prefix: "Review",
            description_prefix: "Review the implementation produced for the instruction",
            acceptance_criteria: &[
                "Review covers correctness, style, and test coverage",
                "Review result recorded on the grandchild ticket",
            ],
        }],
    }
}

fn append_relevant_knowledge(
    description: &mut String,
    instruction: &str,
    lane: ChildLane,
    knowledge: &[KnowledgeEntry],
) {
    let lane_tag = lane_tag(lane);
    let lower_instruction = instruction.to_lowercase();
    for entry in knowledge {
        let relevant = entry.tags.iter().any(|t| t == lane_tag)
            || entry.tags.iter().any(|t| lower_instruction.contains(&t.to_lowercase()));
        if relevant {
            description.push_str("\n\nRelevant knowledge: ");
            description.push_str(&entry.content);
        }
    }
}

fn lane_tag(lane: ChildLane) -> &'static str {
    match lane {
        ChildLane::Research => "research",
        ChildLane::Design => "design",
        ChildLane::Developer => "developer",
        ChildLane::Test => "test",
        ChildLane::Reviewer => "reviewer",
    }
}

fn deterministic_id(
    workflow_id: &str,
    kind: &str,
    lane: ChildLane,
    lane_index: usize,
    leaf_index: usize,
) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(workflow_id.as_bytes());
    hasher.update(kind.as_bytes());
    hasher.update(lane_tag(lane).as_bytes());
    hasher.update(&lane_index.to_le_bytes());
    hasher.update(&leaf_index.to_le_bytes());
    let digest = hasher.finalize().to_hex();
    format!("{kind}-{}", &digest.as_str()[..16])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn developer_lane_always_present() {
        let decomposer = TaskDecomposer::new();
        let result = decomposer.decompose("wf-1", "fix the bug", &[], &[]).unwrap();
        assert!(result.children.iter().any(|c| c.lane == ChildLane::Developer));
    }

    #[test]
    fn keyword_presence_adds_test_lane() {
        let decomposer = TaskDecomposer::new();
        let result = decomposer.decompose("wf-1", "add test coverage for the parser", &[], &[]).unwrap();
        assert!(result.children.iter().any(|c| c.lane == ChildLane::Test));
    }

    #[test]
    fn decomposition_is_deterministic_and_idempotent() {
        let decomposer = TaskDecomposer::new();
        let first = decomposer.decompose("wf-1", "design a new api", &[], &[]).unwrap();
        let second = decomposer.decompose("wf-1", "design a new api", &[], &[]).unwrap();

        let first_ids: Vec<_> = first.children.iter().map(|c| c.id.clone()).collect();
        let second_ids: Vec<_> = second.children.iter().map(|c| c.id.clone()).collect();
        assert_eq!(first_ids, second_ids);

        let first_gc_ids: Vec<_> = first.grandchildren.iter().map(|g| g.id.clone()).collect();
        let second_gc_ids: Vec<_> = second.grandchildren.iter().map(|g| g.id.clone()).collect();
        assert_eq!(first_gc_ids, second_gc_ids);
    }

    #[test]
    fn different_workflow_ids_produce_different_ticket_ids() {
        let decomposer = TaskDecomposer::new();
        let a = decomposer.decompose("wf-a", "fix the bug", &[], &[]).unwrap();
        let b = decomposer.decompose("wf-b", "fix the bug", &[], &[]).unwrap();
        assert_ne!(a.children[0].id, b.children[0].id);
    }

    #[test]
    fn empty_instruction_is_rejected() {
        let decomposer = TaskDecomposer::new();
        assert!(decomposer.decompose("wf-1", "   ", &[], &[]).is_err());
    }

    #[test]
    fn grandchildren_reference_their_parent_child() {
        let decomposer = TaskDecomposer::new();
        let result = decomposer.decompose("wf-1", "review the new module", &[], &[]).unwrap();
        for grandchild in &result.grandchildren {
            assert!(result.children.iter().any(|c| c.id == grandchild.parent_id));
        }
    }
}
