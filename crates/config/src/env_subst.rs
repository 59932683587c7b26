/// Replace `${ENV_VAR}` and `${ENV_VAR:-default}` placeholders in config
/// string values.
///
/// Unresolvable variables without a default are left as-is so the loader can
/// flag them instead of silently writing an empty credential.
pub fn substitute_env(input: &str) -> String {
    substitute_env_with(input, |name| std::env::var(name).ok())
}

fn substitute_env_with(input: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    let mut result = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        result.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            // Unterminated placeholder — emit the remainder literally.
            result.push_str(&rest[start..]);
            return result;
        };
        let body = &after[..end];
        let (name, default) = match body.split_once(":-") {
            Some((name, default)) => (name, Some(default)),
            None => (body, None),
        };
        match (name.is_empty(), lookup(name), default) {
            (false, Some(val), _) => result.push_str(&val),
            (false, None, Some(default)) => result.push_str(default),
            // Unknown without default, or empty name: keep the literal.
            _ => {
                result.push_str("${");
                result.push_str(body);
                result.push('}');
            },
        }
        rest = &after[end + 1..];
    }

    result.push_str(rest);
    result
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn lookup(name: &str) -> Option<String> {
        match name {
            "TIDECHAT_TEST_VAR" => Some("hello".to_string()),
            _ => None,
        }
    }

    #[test]
    fn substitutes_known_var() {
        assert_eq!(
            substitute_env_with("key=${TIDECHAT_TEST_VAR}", lookup),
            "key=hello"
        );
    }

    #[test]
    fn leaves_unknown_var() {
        assert_eq!(
            substitute_env_with("${TIDECHAT_NONEXISTENT_XYZ}", lookup),
            "${TIDECHAT_NONEXISTENT_XYZ}"
        );
    }

    #[test]
    fn falls_back_to_default() {
        assert_eq!(
            substitute_env_with("${TIDECHAT_NONEXISTENT_XYZ:-fallback}", lookup),
            "fallback"
        );
    }

    #[test]
    fn known_var_wins_over_default() {
        assert_eq!(
            substitute_env_with("${TIDECHAT_TEST_VAR:-fallback}", lookup),
            "hello"
        );
    }

    #[test]
    fn unterminated_placeholder_is_literal() {
        assert_eq!(substitute_env_with("a ${broken", lookup), "a ${broken");
    }

    #[test]
    fn no_placeholders() {
        assert_eq!(substitute_env("plain text"), "plain text");
    }
}
