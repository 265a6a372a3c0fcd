//! Deny-list of substrings that mark adversarial or policy-violating content.

/// Default deny-list, lowercase.
pub const DEFAULT_DENY_LIST: &[&str] = &[
    "ignore previous instructions",
    "ignore all instructions",
    "jailbreak",
    "bypass",
    "hack",
    "disable safety",
    "ignore guidelines",
    "forget everything",
    "new instructions",
    "system prompt",
    "override",
];

/// Deny-list entries contained in `text`, in deny-list order. Matching is
/// case-insensitive.
pub fn find_matches<'a>(text: &str, deny_list: &'a [String]) -> Vec<&'a str> {
    let lowered = text.to_lowercase();
    deny_list
        .iter()
        .filter(|pattern| lowered.contains(pattern.as_str()))
        .map(String::as_str)
        .collect()
}
