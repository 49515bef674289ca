// Static scenario catalog. Both sides of a match answer the same prompt.

use serde::Serialize;

/// A scenario the player writes about, with the positions that can be assigned.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct Prompt {
    pub id: &'static str,
    pub title: &'static str,
    pub scenario: &'static str,
    pub positions: &'static [&'static str],
}

impl Prompt {
    pub fn has_position(&self, position: &str) -> bool {
        self.positions.iter().any(|p| *p == position)
    }
}

const PROMPTS: &[Prompt] = &[
    Prompt {
        id: "minimum-wage",
        title: "Raising the minimum wage",
        scenario: "Your city council is voting on raising the local minimum wage to $20/hour \
                   over three years. Write a short letter to the council arguing your position.",
        positions: &["support", "oppose"],
    },
    Prompt {
        id: "gun-control",
        title: "Universal background checks",
        scenario: "A state bill would require background checks for all private firearm sales, \
                   including those at gun shows. Write a short op-ed arguing your position.",
        positions: &["support", "oppose"],
    },
    Prompt {
        id: "immigration",
        title: "Expanding work visas",
        scenario: "Congress is debating doubling the annual cap on skilled work visas. \
                   Write a short message to your representative arguing your position.",
        positions: &["support", "oppose"],
    },
    Prompt {
        id: "school-choice",
        title: "School vouchers",
        scenario: "Your state proposes vouchers letting parents spend public education funds \
                   at private schools. Write a short comment for a school board hearing.",
        positions: &["support", "oppose"],
    },
    Prompt {
        id: "climate-policy",
        title: "Carbon tax",
        scenario: "A national carbon tax with a per-household dividend has been proposed. \
                   Write a short post for a community forum arguing your position.",
        positions: &["support", "oppose"],
    },
];

/// All prompts in catalog order.
pub fn all() -> &'static [Prompt] {
    PROMPTS
}

/// Look up a prompt by id.
pub fn find(id: &str) -> Option<&'static Prompt> {
    PROMPTS.iter().find(|p| p.id == id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_known_prompt() {
        let prompt = find("minimum-wage").unwrap();
        assert_eq!(prompt.title, "Raising the minimum wage");
        assert!(prompt.has_position("support"));
        assert!(!prompt.has_position("abstain"));
    }

    #[test]
    fn test_find_unknown_prompt() {
        assert!(find("does-not-exist").is_none());
    }

    #[test]
    fn test_prompt_ids_are_unique() {
        let mut ids: Vec<&str> = all().iter().map(|p| p.id).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), all().len());
    }
}
