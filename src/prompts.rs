//! Built-in calibration prompt sets.
//!
//! Each category carries a small fixed set of standardized prompts used to
//! judge local-model fitness for that kind of work. The special "general"
//! category is not a prompt set of its own: it takes one representative
//! prompt from every category as a broad smoke test.

/// Category label for the cross-category smoke test.
pub const GENERAL_CATEGORY: &str = "general";

/// A named prompt category with its standardized prompts.
#[derive(Debug, Clone, Copy)]
pub struct PromptCategory {
    pub name: &'static str,
    pub prompts: &'static [&'static str],
}

pub const REASONING: PromptCategory = PromptCategory {
    name: "reasoning",
    prompts: &[
        "A bat and a ball cost $1.10 in total. The bat costs $1.00 more than the ball. How much does the ball cost? Explain your reasoning step by step.",
        "If it takes 5 machines 5 minutes to make 5 widgets, how long would it take 100 machines to make 100 widgets? Show your work.",
    ],
};

pub const CODING: PromptCategory = PromptCategory {
    name: "coding",
    prompts: &[
        "Write a Python function that finds the longest palindromic substring in a given string. Include comments explaining your approach.",
        "Implement a simple LRU cache in Python with O(1) get and put operations.",
    ],
};

pub const WRITING: PromptCategory = PromptCategory {
    name: "writing",
    prompts: &[
        "Write a professional email declining a meeting invitation due to a scheduling conflict. Keep it concise and courteous.",
        "Summarise the key benefits of renewable energy in 100 words or less, using British English spelling.",
    ],
};

pub const ANALYSIS: PromptCategory = PromptCategory {
    name: "analysis",
    prompts: &[
        "What are the potential risks and benefits of a company moving from on-premises infrastructure to cloud computing? Provide a balanced analysis.",
        "Compare and contrast microservices and monolithic architecture. When would you recommend each approach?",
    ],
};

pub const CREATIVE: PromptCategory = PromptCategory {
    name: "creative",
    prompts: &[
        "Write a short story opening (100 words) that hooks the reader immediately.",
        "Create a haiku about artificial intelligence.",
    ],
};

pub const CATEGORIES: &[PromptCategory] = &[REASONING, CODING, WRITING, ANALYSIS, CREATIVE];

/// Look up a built-in category by name. "general" is not listed here; it is
/// expanded by [`smoke_set`].
pub fn category_by_name(name: &str) -> Option<PromptCategory> {
    CATEGORIES.iter().find(|c| c.name == name).copied()
}

/// One representative prompt per category, as `(category, prompt)` pairs.
pub fn smoke_set() -> Vec<(&'static str, &'static str)> {
    CATEGORIES
        .iter()
        .filter_map(|c| c.prompts.first().map(|p| (c.name, *p)))
        .collect()
}

// =============================================================================
// TESTS
// =============================================================================
