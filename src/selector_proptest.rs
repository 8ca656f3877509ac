//! Property-based tests for repository pattern resolution.
//!
//! These tests use proptest to generate random catalogs and pattern sets and
//! verify that resolution invariants hold for all of them.

#[cfg(test)]
mod proptest_tests {
    use std::collections::HashSet;

    use crate::repository::RepositoryDescriptor;
    use crate::selector::resolve;
    use proptest::prelude::*;

    fn arb_repo() -> impl Strategy<Value = RepositoryDescriptor> {
        (
            prop::sample::select(vec!["github", "gitlab", "bitbucket"]),
            "[a-c]{1,2}",
            "[a-d]{1,3}",
        )
            .prop_map(|(platform, owner, name)| {
                RepositoryDescriptor::new(platform, &owner, &name, "https://example.invalid/r.git")
            })
    }

    fn arb_pattern() -> impl Strategy<Value = String> {
        prop_oneof![
            "[a-c]{1,2}/[a-d]{1,3}",
            "[a-c]{1,2}/\\*",
            "\\*/[a-d]{1,3}",
            "(github|gitlab):[a-c]{1,2}/[a-d]{1,3}",
            "re:[a-d]{1,2}",
            Just("*".to_string()),
            Just("re:(".to_string()),
        ]
    }

    proptest! {
        /// Property: the resolved set never contains the same repository twice
        #[test]
        fn resolve_is_duplicate_free(
            catalog in prop::collection::vec(arb_repo(), 0..20),
            patterns in prop::collection::vec(arb_pattern(), 0..6),
        ) {
            let resolution = resolve(&patterns, &catalog);
            let mut seen = HashSet::new();
            for repo in &resolution.repositories {
                prop_assert!(seen.insert(repo.key()), "duplicate {}", repo.qualified_name());
            }
        }

        /// Property: repeating a pattern never changes the result
        #[test]
        fn resolve_ignores_repeated_patterns(
            catalog in prop::collection::vec(arb_repo(), 0..20),
            patterns in prop::collection::vec(arb_pattern(), 1..4),
        ) {
            let once = resolve(&patterns, &catalog);
            let mut doubled = patterns.clone();
            doubled.extend(patterns.iter().cloned());
            let twice = resolve(&doubled, &catalog);
            prop_assert_eq!(once.repositories, twice.repositories);
        }

        /// Property: resolution is deterministic
        #[test]
        fn resolve_is_order_stable(
            catalog in prop::collection::vec(arb_repo(), 0..20),
            patterns in prop::collection::vec(arb_pattern(), 0..6),
        ) {
            let first = resolve(&patterns, &catalog);
            let second = resolve(&patterns, &catalog);
            prop_assert_eq!(first.repositories, second.repositories);
        }

        /// Property: every resolved repository comes from the catalog
        #[test]
        fn resolve_only_returns_catalog_entries(
            catalog in prop::collection::vec(arb_repo(), 0..20),
            patterns in prop::collection::vec(arb_pattern(), 0..6),
        ) {
            let resolution = resolve(&patterns, &catalog);
            for repo in &resolution.repositories {
                prop_assert!(catalog.contains(repo));
            }
            prop_assert!(resolution.repositories.len() <= resolution.total_matches);
        }
    }
}
