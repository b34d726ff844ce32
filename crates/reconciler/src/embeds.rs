//! Pinned info message content for puzzle and round channels.

use belle_model::{NodeHandle, PuzzleHandle, RoundHandle};

use crate::platform::{ActionRow, Component, Embed, EmbedField, SelectOption};

/// Hard platform limit on embed descriptions.
pub const MAX_DESCRIPTION_CHARS: usize = 4096;

const SHEET_URL_PREFIX: &str = "https://docs.google.com/spreadsheets/d/";

const INDEX_INTRO: &str =
    "You may select which puzzle channels to join using the drop-down menu below.";

/// Custom ids of the components on a round index message.
pub const SHOW_PUZZLES: &str = "makePuzzleVisible";
pub const HIDE_PUZZLES: &str = "makePuzzleInvisible";
pub const TOGGLE_ROUND: &str = "toggleRound";
pub const TOGGLE_ALL: &str = "toggleAll";

/// Platform cap on options in one select menu.
pub const MAX_SELECT_OPTIONS: usize = 25;

const TRUNCATION_WARNING: &str = "**Warning: max embed size reached, some data is not displayed. \
     Consider reorganizing this round into sub-rounds.**";

pub fn sheet_url(sheet_id: &str) -> String {
    format!("{SHEET_URL_PREFIX}{sheet_id}")
}

fn field(name: &str, value: String) -> EmbedField {
    EmbedField {
        name: name.to_string(),
        value,
        inline: true,
    }
}

/// Embed pinned in a puzzle's channel.
pub fn puzzle_embed(puzzle: &PuzzleHandle) -> Embed {
    let mut fields = vec![field("Puzzle Page", format!("[Link]({})", puzzle.url()))];
    if let Some(sheet) = puzzle.sheet_id() {
        fields.push(field("Spreadsheet", format!("[Link]({})", sheet_url(sheet))));
    }
    if let Some(answer) = puzzle.answer() {
        fields.push(field("Answer", answer.to_string()));
    }
    if let Some(status) = puzzle.status() {
        fields.push(field("Status", status.to_string()));
    }
    Embed {
        title: Some(puzzle.name().to_string()),
        description: None,
        fields,
    }
}

fn index_line(puzzle: &PuzzleHandle) -> Option<String> {
    let association = puzzle.association()?;
    let sheet = puzzle.sheet_id().map_or_else(
        || "No spreadsheet".to_string(),
        |id| format!("[Spreadsheet]({})", sheet_url(id)),
    );
    let solved = puzzle
        .answer()
        .map(|answer| format!(" | SOLVED: {answer}"))
        .unwrap_or_default();
    Some(format!(
        "**{}** | [Puzzle Link]({}) | {sheet} | <#{}>{solved}",
        puzzle.name(),
        puzzle.url(),
        association.channel_id,
    ))
}

/// Join lines, falling back to a warning header plus as many lines as fit.
fn bounded_description(lines: &[String]) -> String {
    let full = lines.join("\n");
    if full.chars().count() <= MAX_DESCRIPTION_CHARS {
        return full;
    }

    let mut description = format!("{TRUNCATION_WARNING}\n");
    let mut length = description.chars().count();
    for line in lines {
        let needed = line.chars().count() + 1;
        if length + needed > MAX_DESCRIPTION_CHARS {
            break;
        }
        description.push_str(line);
        description.push('\n');
        length += needed;
    }
    description
}

/// Embed pinned in a round's index channel.
pub fn round_embed(round: &RoundHandle) -> Embed {
    let mut lines = vec![INDEX_INTRO.to_string(), String::new()];
    lines.extend(round.children().iter().filter_map(|child| match child {
        NodeHandle::Puzzle(puzzle) => index_line(puzzle),
        _ => None,
    }));

    let fields = round
        .parent_round()
        .and_then(|parent| parent.association())
        .map(|parent| EmbedField {
            name: "Parent Round".to_string(),
            value: format!("<#{}>", parent.index_channel_id),
            inline: false,
        })
        .into_iter()
        .collect();

    Embed {
        title: Some("List of Puzzles".to_string()),
        description: Some(bounded_description(&lines)),
        fields,
    }
}

/// Join/leave menus for the round's puzzles, then the round-wide and
/// hunt-wide toggle buttons.
pub fn round_components(round: &RoundHandle) -> Vec<ActionRow> {
    let options: Vec<SelectOption> = round
        .children()
        .iter()
        .filter_map(|child| match child {
            NodeHandle::Puzzle(puzzle) if puzzle.association().is_some() => Some(SelectOption {
                label: puzzle.name().to_string(),
                value: puzzle.id().as_str().to_string(),
            }),
            _ => None,
        })
        .take(MAX_SELECT_OPTIONS)
        .collect();

    let mut rows = Vec::new();
    if !options.is_empty() {
        rows.push(vec![Component::Select {
            custom_id: SHOW_PUZZLES.to_string(),
            placeholder: "Select which puzzle channels to join".to_string(),
            options: options.clone(),
        }]);
        rows.push(vec![Component::Select {
            custom_id: HIDE_PUZZLES.to_string(),
            placeholder: "Select which puzzle channels to leave".to_string(),
            options,
        }]);
    }
    rows.push(vec![
        Component::Button {
            custom_id: TOGGLE_ROUND.to_string(),
            label: "Toggle see all puzzle channels for this round".to_string(),
        },
        Component::Button {
            custom_id: TOGGLE_ALL.to_string(),
            label: "Toggle see all puzzle channels for the entire hunt".to_string(),
        },
    ]);
    rows
}

fn trimmed(text: Option<&String>) -> &str {
    text.map_or("", |t| t.trim())
}

/// Compare what the platform shows against what we would render.
///
/// Only title, trimmed description and field names/values are compared.
pub fn equivalent(current: &[Embed], target: &[Embed]) -> bool {
    current.len() == target.len()
        && current.iter().zip(target).all(|(have, want)| {
            have.title == want.title
                && trimmed(have.description.as_ref()) == trimmed(want.description.as_ref())
                && have.fields.len() == want.fields.len()
                && have
                    .fields
                    .iter()
                    .zip(&want.fields)
                    .all(|(a, b)| a.name == b.name && a.value == b.value)
        })
}
