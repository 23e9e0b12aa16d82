//! SSO profile sections in the AWS shared config file.

use crate::identity::Identity;

/// An `[profile <name>]` section and its keys, in write order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileSection {
    pub name: String,
    pub entries: Vec<(String, String)>,
}

impl ProfileSection {
    /// Profile for an assumed-role identity, or `None` when the identity has
    /// no role or no federation settings to write.
    #[must_use]
    pub fn for_identity(identity: &Identity, region: &str) -> Option<Self> {
        let role = identity.role.as_ref()?;
        let params = identity.federation_params()?;
        Some(Self {
            name: identity.name.clone(),
            entries: vec![
                ("sso_start_url".to_string(), params.start_url.clone()),
                ("sso_region".to_string(), params.region.clone()),
                ("sso_account_id".to_string(), role.account_id.clone()),
                ("sso_role_name".to_string(), role.role_name.clone()),
                ("region".to_string(), region.to_string()),
                ("output".to_string(), "json".to_string()),
            ],
        })
    }

    fn header(&self) -> String {
        if self.name == "default" {
            "[default]".to_string()
        } else {
            format!("[profile {}]", self.name)
        }
    }

    fn render(&self) -> String {
        let mut out = self.header();
        out.push('\n');
        for (key, value) in &self.entries {
            out.push_str(&format!("{key} = {value}\n"));
        }
        out
    }
}

fn section_name(line: &str) -> Option<&str> {
    let trimmed = line.trim();
    let inner = trimmed.strip_prefix('[')?.strip_suffix(']')?.trim();
    Some(inner.strip_prefix("profile ").map_or(inner, str::trim))
}

/// Replace the section for `profile` in `content`, or append it.
///
/// Every other line, including comments, is kept as is.
#[must_use]
pub fn upsert_profile(content: &str, profile: &ProfileSection) -> String {
    let lines: Vec<&str> = content.lines().collect();
    let start = lines
        .iter()
        .position(|line| section_name(line) == Some(profile.name.as_str()));

    let Some(start) = start else {
        let mut out = content.to_string();
        if !out.is_empty() && !out.ends_with('\n') {
            out.push('\n');
        }
        if !out.trim().is_empty() {
            out.push('\n');
        }
        out.push_str(&profile.render());
        return out;
    };

    let end = lines[start + 1..]
        .iter()
        .position(|line| section_name(line).is_some())
        .map_or(lines.len(), |offset| start + 1 + offset);

    let mut out = String::with_capacity(content.len());
    for line in &lines[..start] {
        out.push_str(line);
        out.push('\n');
    }
    out.push_str(&profile.render());
    if end < lines.len() {
        out.push('\n');
        for line in &lines[end..] {
            out.push_str(line);
            out.push('\n');
        }
    }
    out
}
