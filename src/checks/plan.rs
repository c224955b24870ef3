use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref PLAN_CHANGES: Regex =
        Regex::new(r"(?m)^Plan: (\d+) to add, (\d+) to change, (\d+) to destroy\.$")
            .expect("valid regex");
    static ref NO_CHANGES: Regex =
        Regex::new(r"(?m)^No changes\. Infrastructure is up-to-date\.$").expect("valid regex");
}

/// Resource counts reported by `terraform plan`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Plan {
    pub adds: u32,
    pub changes: u32,
    pub deletions: u32,
}

impl Plan {
    /// A compact rendering such as `+2/~0/−1`.
    pub fn summary(&self) -> String {
        format!("+{}/~{}/\u{2212}{}", self.adds, self.changes, self.deletions)
    }
}

pub fn parse_plan_output(output: &str) -> anyhow::Result<Plan> {
    if let Some(captures) = PLAN_CHANGES.captures(output) {
        return Ok(Plan {
            adds: captures[1].parse()?,
            changes: captures[2].parse()?,
            deletions: captures[3].parse()?,
        });
    }

    if NO_CHANGES.is_match(output) {
        return Ok(Plan::default());
    }

    Err(anyhow::anyhow!("unable to parse plan output"))
}
