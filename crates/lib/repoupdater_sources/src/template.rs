//! Repository-name templating (spec.md §4.B `makeRepo`: "`name` computed
//! from a per-kind path-pattern template").
//!
//! Variables are substituted with plain `{var}` tokens rather than a real
//! template engine — the variable set is small and fixed per host kind, so
//! pulling in a templating crate for this would be the premature
//! abstraction the exercise's own ground rules warn against.

/// Replaces every `{key}` occurrence in `pattern` with its value from
/// `vars`. Unknown `{key}` tokens are left untouched.
pub fn render(pattern: &str, vars: &[(&str, &str)]) -> String {
    let mut out = pattern.to_string();
    for (key, value) in vars {
        out = out.replace(&format!("{{{key}}}"), value);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substitutes_known_variables() {
        let rendered = render(
            "{host}/{nameWithOwner}",
            &[("host", "github.com"), ("nameWithOwner", "acme/widgets")],
        );
        assert_eq!(rendered, "github.com/acme/widgets");
    }

    #[test]
    fn leaves_unknown_tokens_alone() {
        let rendered = render("{host}/{mystery}", &[("host", "github.com")]);
        assert_eq!(rendered, "github.com/{mystery}");
    }
}
