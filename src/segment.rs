use lazy_static::lazy_static;
use regex::Regex;
use serde::{ Deserialize, Serialize };

use crate::intent::Intent;

lazy_static! {
    // The language tag only counts when it sits alone on the opening fence line.
    static ref CODE_FENCE: Regex = Regex::new(
        r"```(?:([\w+#.\-]*)[ \t]*\r?\n)?([\s\S]*?)```"
    ).expect("code fence pattern");
}

/// A contiguous span of model output.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Fragment {
    Prose {
        text: String,
    },
    Code {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        language: Option<String>,
        text: String,
    },
    /// Whole essay response, rendered as a single long-form entry.
    LongForm {
        text: String,
    },
}

/// What the essay threshold is measured against.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LengthBasis {
    /// The prose left after removing fenced code.
    Prose,
    /// The full trimmed response.
    Raw,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EssayRouting {
    pub threshold: usize,
    pub basis: LengthBasis,
}

impl Default for EssayRouting {
    fn default() -> Self {
        Self {
            threshold: 1000,
            basis: LengthBasis::Prose,
        }
    }
}

/// Splits a response into prose followed by code fragments in source order.
///
/// Text without fences yields exactly one prose fragment (the trimmed
/// input, possibly empty). Unterminated fences are left in the prose.
pub fn segment(text: &str) -> Vec<Fragment> {
    let mut code = Vec::new();
    for caps in CODE_FENCE.captures_iter(text) {
        let language = caps
            .get(1)
            .map(|m| m.as_str())
            .filter(|lang| !lang.is_empty())
            .map(str::to_string);
        let body = caps.get(2).map(|m| m.as_str()).unwrap_or_default();
        code.push(Fragment::Code {
            language,
            text: body.trim().to_string(),
        });
    }

    if code.is_empty() {
        return vec![Fragment::Prose { text: text.trim().to_string() }];
    }

    let prose = strip_fences(text);
    let mut fragments = Vec::with_capacity(code.len() + 1);
    if !prose.is_empty() {
        fragments.push(Fragment::Prose { text: prose });
    }
    fragments.extend(code);
    fragments
}

/// Removes every fenced region and trims what remains.
pub fn strip_fences(text: &str) -> String {
    CODE_FENCE.replace_all(text, "").trim().to_string()
}

/// Segments a response for the given intent. Essay responses longer than
/// the threshold become a single long-form fragment with no code
/// extraction.
pub fn segment_for_intent(text: &str, intent: Intent, routing: &EssayRouting) -> Vec<Fragment> {
    if intent == Intent::Essay && is_long_form(text, routing) {
        return vec![Fragment::LongForm { text: text.trim().to_string() }];
    }
    segment(text)
}

fn is_long_form(text: &str, routing: &EssayRouting) -> bool {
    let length = match routing.basis {
        LengthBasis::Prose => strip_fences(text).chars().count(),
        LengthBasis::Raw => text.trim().chars().count(),
    };
    length > routing.threshold
}
