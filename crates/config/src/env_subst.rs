/// Replace `${ENV_VAR}` placeholders in raw config text.
///
/// Unset variables and unterminated placeholders are kept verbatim so that
/// validation can point at them.
pub fn substitute_env(input: &str) -> String {
    substitute_with(input, |name| std::env::var(name).ok())
}

fn substitute_with(input: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            out.push_str(&rest[start..]);
            return out;
        };
        let name = &after[..end];
        let value = if name.is_empty() {
            None
        } else {
            lookup(name)
        };
        match value {
            Some(value) => out.push_str(&value),
            // `${`, the name and `}`.
            None => out.push_str(&rest[start..start + end + 3]),
        }
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mesh_home(name: &str) -> Option<String> {
        (name == "MESH_HOME").then(|| "/srv/mesh".to_string())
    }

    #[test]
    fn substitutes_data_dir() {
        assert_eq!(
            substitute_with("data_dir = \"${MESH_HOME}/state\"", mesh_home),
            "data_dir = \"/srv/mesh/state\""
        );
        assert_eq!(
            substitute_with("${MESH_HOME}:${MESH_HOME}", mesh_home),
            "/srv/mesh:/srv/mesh"
        );
    }

    #[test]
    fn leaves_unknown_empty_and_unterminated() {
        assert_eq!(substitute_with("${MESH_NOPE}", mesh_home), "${MESH_NOPE}");
        assert_eq!(substitute_with("a ${} b", mesh_home), "a ${} b");
        assert_eq!(substitute_with("home = ${MESH", mesh_home), "home = ${MESH");
    }

    #[test]
    fn no_placeholders() {
        assert_eq!(substitute_env("window_secs = 10"), "window_secs = 10");
    }
}
