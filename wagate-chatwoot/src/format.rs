//! Text style conversion between WhatsApp and Chatwoot.
//!
//! | WhatsApp  | Chatwoot (Markdown) |
//! |-----------|---------------------|
//! | `*bold*`  | `**bold**`          |
//! | `_it_`    | `*it*`              |
//! | `~del~`   | `~~del~~`           |

use regex::Regex;
use std::sync::LazyLock;

/// Stand-in for a bold marker while italics are rewritten.
const BOLD_MARK: char = '\u{1}';

static MD_BOLD: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\*\*([^*\n]+?)\*\*").unwrap());
static MD_ITALIC: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\*([^*\n]+?)\*").unwrap());
static MD_STRIKE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"~~([^~\n]+?)~~").unwrap());

static WA_BOLD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(^|[\s(])\*([^*\n]+?)\*($|[\s).,!?:;])").unwrap());
static WA_ITALIC: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(^|[\s(])_([^_\n]+?)_($|[\s).,!?:;])").unwrap());
static WA_STRIKE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(^|[\s(])~([^~\n]+?)~($|[\s).,!?:;])").unwrap());

/// Chatwoot Markdown to WhatsApp styling, for agent replies.
pub fn to_whatsapp(text: &str) -> String {
    let marked = format!("{BOLD_MARK}$1{BOLD_MARK}");
    let text = MD_BOLD.replace_all(text, marked.as_str());
    let text = MD_ITALIC.replace_all(&text, "_${1}_");
    let text = MD_STRIKE.replace_all(&text, "~${1}~");
    text.replace(BOLD_MARK, "*")
}

/// WhatsApp styling to Chatwoot Markdown, for incoming messages.
pub fn to_chatwoot(text: &str) -> String {
    let marked = format!("${{1}}{BOLD_MARK}${{2}}{BOLD_MARK}${{3}}");
    let text = WA_BOLD.replace_all(text, marked.as_str());
    let text = WA_ITALIC.replace_all(&text, "${1}*${2}*${3}");
    let text = WA_STRIKE.replace_all(&text, "${1}~~${2}~~${3}");
    text.replace(BOLD_MARK, "**")
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("**Hello** there", "*Hello* there" ; "bold")]
    #[test_case("an *important* word", "an _important_ word" ; "italic")]
    #[test_case("~~old~~ new", "~old~ new" ; "strike")]
    #[test_case("**bold** and *it*", "*bold* and _it_" ; "mixed")]
    #[test_case("plain text", "plain text" ; "plain")]
    fn test_to_whatsapp(input: &str, expected: &str) {
        assert_eq!(to_whatsapp(input), expected);
    }

    #[test_case("*Hello* there", "**Hello** there" ; "bold")]
    #[test_case("an _important_ word", "an *important* word" ; "italic")]
    #[test_case("~old~ new", "~~old~~ new" ; "strike")]
    #[test_case("see file_name_here", "see file_name_here" ; "snake case untouched")]
    #[test_case("2*3*4", "2*3*4" ; "arithmetic untouched")]
    fn test_to_chatwoot(input: &str, expected: &str) {
        assert_eq!(to_chatwoot(input), expected);
    }
}
