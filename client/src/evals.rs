//! Cooldown inference from generated code fragments.
//!
//! The server has no structured event for some cooldowns; they arrive as
//! code-like text in eval pushes. Parsing that text is an inherently
//! fragile protocol coupling, so the matching rules live behind this trait
//! where they can be tested (and replaced) in isolation. If the server's
//! phrasing changes, cooldowns from this side channel are silently missed.

#[derive(Debug, Clone, PartialEq)]
pub enum EvalHint {
    /// `skill_timeout('name', ms?)`; `ms` falls back to the dataset
    /// cooldown when omitted.
    SkillTimeout { skill: String, ms: Option<f64> },
    /// `pot_timeout(ms)`; applies to both potion pseudo-skills.
    PotionTimeout { ms: f64 },
}

pub trait EvalParser: Send + Sync {
    fn parse(&self, code: &str) -> Option<EvalHint>;
}

#[derive(Debug, Default)]
pub struct DefaultEvalParser;

impl EvalParser for DefaultEvalParser {
    fn parse(&self, code: &str) -> Option<EvalHint> {
        if let Some(args) = call_arguments(code, "skill_timeout") {
            let mut parts = args.splitn(2, ',');
            let skill = unquote(parts.next()?.trim())?;
            let ms = parts.next().and_then(|raw| raw.trim().parse::<f64>().ok());
            return Some(EvalHint::SkillTimeout {
                skill: skill.to_string(),
                ms,
            });
        }

        if let Some(args) = call_arguments(code, "pot_timeout") {
            let ms = args.trim().parse::<f64>().ok()?;
            return Some(EvalHint::PotionTimeout { ms });
        }

        None
    }
}

/// The argument text of `name(...)` if the code contains such a call.
fn call_arguments<'a>(code: &'a str, name: &str) -> Option<&'a str> {
    let start = code.find(name)? + name.len();
    let rest = code[start..].trim_start();
    let rest = rest.strip_prefix('(')?;
    let end = rest.find(')')?;
    Some(&rest[..end])
}

/// Strips one layer of matching single or double quotes.
fn unquote(raw: &str) -> Option<&str> {
    if raw.len() >= 2 {
        let bytes = raw.as_bytes();
        if (bytes[0] == b'\'' && bytes[raw.len() - 1] == b'\'')
            || (bytes[0] == b'"' && bytes[raw.len() - 1] == b'"')
        {
            return Some(&raw[1..raw.len() - 1]);
        }
    }
    None
}
