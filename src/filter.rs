//! Decide which interpreter globals are shown to the user.

/// Globals that are never surfaced to the user: module dunders, kernel helpers and
/// output history shortcuts.
pub const EXCLUDED_NAMES: &[&str] = &[
    "__name__",
    "__doc__",
    "__package__",
    "__loader__",
    "__spec__",
    "__annotations__",
    "__builtins__",
    "__builtin__",
    "display",
    "get_ipython",
    "debugpy",
    "exit",
    "quit",
    "In",
    "Out",
    "_oh",
    "_dh",
    "_",
    "__",
    "___",
];

/// Input history variables (`_i`, `_ii`, `_i7`, ...) share this prefix.
const INPUT_HISTORY_PREFIX: &str = "_i";

/// Return `true` if a global with this name should be visible in the debugger.
pub fn keep(name: &str) -> bool {
    !name.starts_with(INPUT_HISTORY_PREFIX) && !is_output_cache(name) && !is_excluded(name)
}

/// Numbered output cache variables: `_1`, `_42`, ...
fn is_output_cache(name: &str) -> bool {
    let mut chars = name.chars();
    chars.next() == Some('_') && chars.next().is_some_and(|c| c.is_ascii_digit())
}

fn is_excluded(name: &str) -> bool {
    EXCLUDED_NAMES.contains(&name)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_excluded_names_are_dropped() {
        for name in EXCLUDED_NAMES {
            assert!(!keep(name), "{name} must be hidden");
        }
    }

    #[test]
    fn test_keep() {
        struct TestCase {
            name: &'static str,
            expected: bool,
        }

        let cases = [
            TestCase {
                name: "my_var",
                expected: true,
            },
            TestCase {
                name: "x",
                expected: true,
            },
            TestCase {
                name: "__",
                expected: false,
            },
            TestCase {
                name: "_1",
                expected: false,
            },
            TestCase {
                name: "_42abc",
                expected: false,
            },
            TestCase {
                name: "_a1",
                expected: true,
            },
            TestCase {
                name: "_i",
                expected: false,
            },
            TestCase {
                name: "_ii",
                expected: false,
            },
            TestCase {
                name: "_i12",
                expected: false,
            },
            TestCase {
                name: "__init_done",
                expected: true,
            },
            TestCase {
                name: "i_var",
                expected: true,
            },
            TestCase {
                name: "display_df",
                expected: true,
            },
        ];

        for tc in cases {
            assert_eq!(keep(tc.name), tc.expected, "name: {}", tc.name);
        }
    }
}
