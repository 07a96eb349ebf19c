//! Static policy checks over generated HCL.
//!
//! These run alongside `terraform validate` and can fail the Validate
//! stage even when the toolchain accepts the configuration.

use regex::Regex;

/// One static policy violation, human-readable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyViolation {
    /// The offending resource name.
    pub resource: String,
    /// What the policy forbids.
    pub message: String,
}

impl std::fmt::Display for PolicyViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.resource, self.message)
    }
}

/// Inline `ingress`/`egress` blocks inside `aws_security_group` bodies
/// are forbidden; rules must be separate `aws_security_group_rule`
/// resources so the repair loop can manage them without dependency
/// cycles.
pub fn check_security_group_rules(hcl: &str) -> Vec<PolicyViolation> {
    let header = Regex::new(r#"resource\s+"aws_security_group"\s+"([^"]*)"\s*\{"#)
        .expect("static pattern compiles");
    let inline_rule =
        Regex::new(r"(?m)^[ \t]*(ingress|egress)\s*\{").expect("static pattern compiles");

    let mut violations = Vec::new();
    for captures in header.captures_iter(hcl) {
        let name = &captures[1];
        let Some(m) = captures.get(0) else { continue };
        let Some(body) = body_span(hcl, m.end() - 1) else {
            continue;
        };
        for rule in inline_rule.captures_iter(&hcl[body.0..body.1]) {
            violations.push(PolicyViolation {
                resource: name.to_string(),
                message: format!(
                    "inline {} block in security group; use a separate aws_security_group_rule resource",
                    &rule[1]
                ),
            });
        }
    }
    violations
}

/// `(start, end)` of the body between the brace at `open` and its match.
fn body_span(text: &str, open: usize) -> Option<(usize, usize)> {
    let bytes = text.as_bytes();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, &byte) in bytes[open..].iter().enumerate() {
        if escaped {
            escaped = false;
            continue;
        }
        match byte {
            b'\\' if in_string => escaped = true,
            b'"' => in_string = !in_string,
            b'{' if !in_string => depth += 1,
            b'}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some((open + 1, open + offset));
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inline_ingress_is_flagged() {
        let hcl = r#"
resource "aws_security_group" "web_sg" {
  name = "web-sg"
  ingress {
    from_port = 80
    to_port   = 80
  }
}
"#;
        let violations = check_security_group_rules(hcl);
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].resource, "web_sg");
        assert!(violations[0].message.contains("inline ingress"));
    }

    #[test]
    fn separate_rule_resources_pass() {
        let hcl = r#"
resource "aws_security_group" "web_sg" {
  name = "web-sg"
}

resource "aws_security_group_rule" "web_in" {
  type      = "ingress"
  from_port = 80
}
"#;
        assert!(check_security_group_rules(hcl).is_empty());
    }

    #[test]
    fn ingress_outside_security_groups_is_ignored() {
        // `ingress` appearing in other block types is out of scope here.
        let hcl = r#"
resource "aws_network_acl" "acl" {
  ingress {
    rule_no = 100
  }
}
"#;
        assert!(check_security_group_rules(hcl).is_empty());
    }
}
