//! Deterministic HCL repairs.
//!
//! These textual fixes target the handful of mistakes the code-generation
//! model makes repeatedly. All of them are idempotent and they run only
//! after a stage has failed, never preemptively.

use std::ops::Range;

use regex::Regex;

/// Apply every deterministic fix in sequence. Returns the repaired text
/// (possibly unchanged).
pub fn apply_all(hcl: &str) -> String {
    let step1 = fix_egress_group_reference(hcl);
    let step2 = strip_unsupported_tags(&step1);
    let step3 = strip_inline_security_group_rules(&step2);
    normalize_security_group_names(&step3)
}

/// `destination_security_group_id` is not a valid argument on egress
/// rules; the provider wants `source_security_group_id` in both
/// directions.
pub fn fix_egress_group_reference(hcl: &str) -> String {
    hcl.replace("destination_security_group_id", "source_security_group_id")
}

/// Resource types that reject a `tags` argument.
const TAGLESS_TYPES: [&str; 2] = ["aws_route_table_association", "aws_security_group_rule"];

/// Drop `tags = { ... }` arguments from resources that do not support
/// them.
pub fn strip_unsupported_tags(hcl: &str) -> String {
    let mut result = hcl.to_string();
    for resource_type in TAGLESS_TYPES {
        loop {
            let Some(body) = find_resource_body(&result, resource_type) else {
                break;
            };
            let Some(tags) = find_argument_block(&result[body.clone()], "tags") else {
                break;
            };
            let absolute = body.start + tags.start..body.start + tags.end;
            result.replace_range(absolute, "");
        }
    }
    result
}

/// Remove inline `ingress { ... }` and `egress { ... }` blocks from
/// security-group bodies. Rules must live in separate
/// `aws_security_group_rule` resources; inline blocks fight them over
/// ownership.
pub fn strip_inline_security_group_rules(hcl: &str) -> String {
    let mut result = hcl.to_string();
    loop {
        let Some(body) = find_resource_body(&result, "aws_security_group") else {
            break;
        };
        let inner = &result[body.clone()];
        let Some(rule) =
            find_nested_block(inner, "ingress").or_else(|| find_nested_block(inner, "egress"))
        else {
            break;
        };
        let absolute = body.start + rule.start..body.start + rule.end;
        result.replace_range(absolute, "");
    }
    result
}

/// Normalize `name = "sg-X"` identifiers to `name = "X-sg"`. Names that
/// begin with `sg-` collide with provider-assigned identifiers.
pub fn normalize_security_group_names(hcl: &str) -> String {
    let re = Regex::new(r#"name\s*=\s*"sg-([A-Za-z0-9_]+)""#).expect("static pattern compiles");
    re.replace_all(hcl, r#"name = "$1-sg""#).into_owned()
}

/// Span of the body (inside the outer braces) of the first resource of
/// the given type that still contains a searchable body.
fn find_resource_body(hcl: &str, resource_type: &str) -> Option<Range<usize>> {
    let header = format!(r#"resource\s+"{resource_type}"\s+"[^"]*"\s*\{{"#);
    let re = Regex::new(&header).ok()?;
    let mut search_from = 0;
    while let Some(m) = re.find(&hcl[search_from..]) {
        let open = search_from + m.end() - 1;
        if let Some(close) = matching_brace(hcl, open) {
            let body = open + 1..close;
            // Only return bodies that still need work; callers loop until
            // this returns None for their pattern.
            if body_needs_work(&hcl[body.clone()], resource_type) {
                return Some(body);
            }
            search_from = close + 1;
        } else {
            return None;
        }
    }
    None
}

fn body_needs_work(body: &str, resource_type: &str) -> bool {
    if resource_type == "aws_security_group" {
        find_nested_block(body, "ingress").is_some() || find_nested_block(body, "egress").is_some()
    } else {
        find_argument_block(body, "tags").is_some()
    }
}

/// Span of a `keyword { ... }` nested block inside `body`, including any
/// leading indentation on its line.
fn find_nested_block(body: &str, keyword: &str) -> Option<Range<usize>> {
    let pattern = format!(r"(?m)^[ \t]*{keyword}\s*\{{");
    let re = Regex::new(&pattern).ok()?;
    let m = re.find(body)?;
    let open = m.end() - 1;
    let close = matching_brace(body, open)?;
    Some(m.start()..close + 1)
}

/// Span of a `keyword = { ... }` argument inside `body`.
fn find_argument_block(body: &str, keyword: &str) -> Option<Range<usize>> {
    let pattern = format!(r"(?m)^[ \t]*{keyword}\s*=\s*\{{");
    let re = Regex::new(&pattern).ok()?;
    let m = re.find(body)?;
    let open = m.end() - 1;
    let close = matching_brace(body, open)?;
    Some(m.start()..close + 1)
}

/// Index of the brace matching the one at `open`, string-literal aware.
fn matching_brace(text: &str, open: usize) -> Option<usize> {
    let bytes = text.as_bytes();
    if bytes.get(open) != Some(&b'{') {
        return None;
    }
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
                    return Some(open + offset);
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

    const SG_WITH_INLINE_RULES: &str = r#"
resource "aws_security_group" "sg_web" {
  name   = "sg-web"
  vpc_id = aws_vpc.vpc-main.id

  ingress {
    from_port   = 80
    to_port     = 80
    protocol    = "tcp"
    cidr_blocks = ["0.0.0.0/0"]
  }

  egress {
    from_port                     = 0
    to_port                       = 0
    protocol                      = "-1"
    destination_security_group_id = aws_security_group.sg_db.id
  }
}
"#;

    #[test]
    fn egress_reference_is_rewritten() {
        let fixed = fix_egress_group_reference(SG_WITH_INLINE_RULES);
        assert!(!fixed.contains("destination_security_group_id"));
        assert!(fixed.contains("source_security_group_id"));
    }

    #[test]
    fn inline_rules_are_stripped() {
        let fixed = strip_inline_security_group_rules(SG_WITH_INLINE_RULES);
        assert!(!fixed.contains("ingress {"));
        assert!(!fixed.contains("egress {"));
        assert!(fixed.contains(r#"resource "aws_security_group" "sg_web""#));
        assert!(fixed.contains("vpc_id"));
    }

    #[test]
    fn sg_name_is_normalized() {
        let fixed = normalize_security_group_names(r#"name = "sg-web""#);
        assert_eq!(fixed, r#"name = "web-sg""#);
    }

    #[test]
    fn unsupported_tags_are_dropped() {
        let hcl = r#"
resource "aws_route_table_association" "assoc" {
  subnet_id      = aws_subnet.public.id
  route_table_id = aws_route_table.rt.id
  tags = {
    Name = "assoc"
  }
}

resource "aws_instance" "web" {
  ami  = "ami-123"
  tags = {
    Name = "web"
  }
}
"#;
        let fixed = strip_unsupported_tags(hcl);
        // Association loses its tags, the instance keeps them.
        let assoc = fixed
            .split("resource \"aws_instance\"")
            .next()
            .unwrap();
        assert!(!assoc.contains("tags"));
        assert!(fixed.contains("Name = \"web\""));
    }

    #[test]
    fn fixes_are_idempotent() {
        let once = apply_all(SG_WITH_INLINE_RULES);
        let twice = apply_all(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn clean_code_is_untouched() {
        let hcl = r#"
resource "aws_security_group" "db_sg" {
  name   = "db-sg"
  vpc_id = aws_vpc.vpc-main.id
}

resource "aws_security_group_rule" "db_in" {
  type                     = "ingress"
  from_port                = 5432
  to_port                  = 5432
  protocol                 = "tcp"
  security_group_id        = aws_security_group.db_sg.id
  source_security_group_id = aws_security_group.web_sg.id
}
"#;
        assert_eq!(apply_all(hcl), hcl);
    }
}
