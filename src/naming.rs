//! Cassette names derived from test descriptions.

/// Turn a free-form scenario description into a stable, filesystem-safe
/// cassette name.
///
/// Whitespace runs become `_`, `.` becomes a path separator, any other run of
/// characters outside `[A-Za-z0-9_/]` becomes `_`. Repeated separators are
/// collapsed and the result never starts or ends with `/`, so it always stays
/// relative to the cassette directory.
pub fn scenario_name(description: &str) -> String {
    let mut name = String::with_capacity(description.len());
    let mut in_replacement = false;

    for ch in description.chars() {
        let mapped = match ch {
            '.' | '/' => Some('/'),
            c if c.is_ascii_alphanumeric() || c == '_' => Some(c),
            _ => None,
        };
        match mapped {
            Some('/') => {
                in_replacement = false;
                if !name.is_empty() && !name.ends_with('/') {
                    name.push('/');
                }
            }
            Some(c) => {
                in_replacement = false;
                name.push(c);
            }
            None => {
                if !in_replacement {
                    name.push('_');
                    in_replacement = true;
                }
            }
        }
    }

    while name.ends_with('/') {
        name.pop();
    }
    name
}

#[cfg(test)]
mod tests {
    use super::scenario_name;

    #[test]
    fn descriptions_become_stable_names() {
        assert_eq!(scenario_name("list resource groups"), "list_resource_groups");
        assert_eq!(
            scenario_name("should raise error that the Tenant id was not specified"),
            "should_raise_error_that_the_Tenant_id_was_not_specified"
        );
        assert_eq!(scenario_name("Resource Manager.create group"), "Resource_Manager/create_group");
        assert_eq!(scenario_name("  tabs\tand\nnewlines  "), "_tabs_and_newlines_");
    }

    #[test]
    fn names_cannot_escape_the_cassette_directory() {
        assert_eq!(scenario_name("../../etc/passwd"), "etc/passwd");
        assert_eq!(scenario_name("/absolute/path/"), "absolute/path");
        assert_eq!(scenario_name("a..b"), "a/b");
        assert_eq!(scenario_name("weird: chars!*?"), "weird_chars_");
    }
}
