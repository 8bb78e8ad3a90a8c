//! Keyword-based lane selection shared by the Task Decomposer (which worker
//! lanes to instantiate) and the Meeting Coordinator (which roles attend).
//! `developer` is always selected; everything else depends on whether a
//! keyword for that lane appears in the instruction text.

use crate::domain::ChildLane;

const KEYWORDS: &[(ChildLane, &[&str])] = &[
    (ChildLane::Research, &["research", "investigate", "explore", "survey", "evaluate options"]),
    (ChildLane::Design, &["design", "architecture", "schema", "api design", "interface"]),
    (ChildLane::Test, &["test", "testing", "qa", "verify", "coverage"]),
    (ChildLane::Reviewer, &["review", "audit", "security review", "code review"]),
];

/// Lanes implied by `instruction`, always including [`ChildLane::Developer`]
/// first. `extra_flags` force-includes additional lanes regardless of
/// keyword presence (the decomposer's "explicit flag" override).
pub fn select_lanes(instruction: &str, extra_flags: &[ChildLane]) -> Vec<ChildLane> {
    let lower = instruction.to_lowercase();
    let mut lanes = vec![ChildLane::Developer];

    for (lane, keywords) in KEYWORDS {
        let matched = keywords.iter().any(|kw| lower.contains(kw)) || extra_flags.contains(lane);
        if matched && !lanes.contains(lane) {
            lanes.push(*lane);
        }
    }

    for lane in extra_flags {
        if !lanes.contains(lane) {
            lanes.push(*lane);
        }
    }

    lanes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn developer_always_included() {
        let lanes = select_lanes("do nothing special", &[]);
        assert_eq!(lanes, vec![ChildLane::Developer]);
    }

    #[test]
    fn keyword_match_adds_lanes() {
        let lanes = select_lanes("Research options then design the schema", &[]);
        assert!(lanes.contains(&ChildLane::Research));
        assert!(lanes.contains(&ChildLane::Design));
        assert!(!lanes.contains(&ChildLane::Test));
    }

    #[test]
    fn explicit_flag_forces_lane() {
        let lanes = select_lanes("just write the code", &[ChildLane::Reviewer]);
        assert!(lanes.contains(&ChildLane::Reviewer));
    }

    #[test]
    fn no_duplicate_lanes_when_flag_and_keyword_both_match() {
        let lanes = select_lanes("please review this", &[ChildLane::Reviewer]);
        assert_eq!(lanes.iter().filter(|l| **l == ChildLane::Reviewer).count(), 1);
    }
}
