//! Environment variable interpolation for config files.
//!
//! Supports the following syntax:
//! - `$VAR` or `${VAR}` - substitute with env var value, error if missing
//! - `${VAR:-default}` - use default if VAR is unset OR empty
//! - `${VAR-default}` - use default only if VAR is unset (empty is OK)
//! - `$$` - escape sequence for literal `$`

use regex::{Captures, Regex};
use std::env;
use std::sync::LazyLock;

static ENV_VAR_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?x)
        \$\$                           # Escape sequence $$
        |
        \$\{                           # Opening ${
            ([A-Za-z_][A-Za-z0-9_]*)   # Variable name (group 1)
            (?:
                (:?-)                  # :- or - (group 2)
                ([^}]*)                # Default value (group 3)
            )?
        \}
        |
        \$([A-Za-z_][A-Za-z0-9_]*)     # Unbraced $VAR (group 4)
        ",
    )
    .expect("Invalid regex pattern")
});

/// Interpolate process environment variables into `input`.
///
/// All problems are collected so every missing variable is reported at once.
pub fn interpolate(input: &str) -> Result<String, Vec<String>> {
    interpolate_with(input, |name| env::var(name).ok())
}

/// Interpolate using `lookup` to resolve variable names.
pub fn interpolate_with<F>(input: &str, lookup: F) -> Result<String, Vec<String>>
where
    F: Fn(&str) -> Option<String>,
{
    let mut errors = Vec::new();

    let text = ENV_VAR_PATTERN.replace_all(input, |caps: &Captures| {
        let full_match = &caps[0];
        if full_match == "$$" {
            return "$".to_string();
        }

        let Some(name) = caps.get(1).or_else(|| caps.get(4)).map(|m| m.as_str()) else {
            return full_match.to_string();
        };
        let empty_means_unset = caps.get(2).is_some_and(|m| m.as_str() == ":-");
        let default = caps.get(3).map(|m| m.as_str());

        match lookup(name) {
            Some(value) if value.contains('\n') || value.contains('\r') => {
                errors.push(format!(
                    "environment variable '{name}' contains newlines, which is not allowed"
                ));
                full_match.to_string()
            }
            Some(value) if value.is_empty() && empty_means_unset => {
                default.unwrap_or_default().to_string()
            }
            Some(value) => value,
            None => match default {
                Some(default) => default.to_string(),
                None => {
                    errors.push(format!("environment variable '{name}' is not set"));
                    full_match.to_string()
                }
            },
        }
    });

    if errors.is_empty() {
        Ok(text.into_owned())
    } else {
        Err(errors)
    }
}
