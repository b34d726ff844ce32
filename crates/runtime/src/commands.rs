//! Typed bot commands and their handlers.
//!
//! Handlers edit the hunt document and answer the interaction in plain
//! text. Chat resources are never touched here directly: the edits raise
//! change notifications and the document's queue reconciles them.

use std::sync::Arc;

use belle_core::{ChannelId, UserId};
use belle_model::{
    walk, DocumentId, DocumentService, LoggingChannels, NodeHandle, NodeId, PuzzleHandle,
    Puzzlehunt, RoundHandle, Snapshot,
};
use belle_reconciler::platform::{SEND_MESSAGES, VIEW_CHANNEL};
use belle_reconciler::{Guild, NewChannel, NewMessage, Overwrite, SheetService};
use regex::Regex;
use tracing::{info, warn};

use crate::context::{HuntContext, SerializedHuntContext, ADMIN_CHANNEL_NAME};
use crate::error::Result;
use crate::interaction::Interaction;
use crate::queue::DocumentQueue;

const DRIVE_FOLDER_PATTERN: &str =
    r"https://drive\.google\.com/drive/folders/(.*?)\?usp=(sharing|share_link)";

const NOT_A_PUZZLE_CHANNEL: &str = "No puzzle is associated with this channel!";
const ADMIN_CHANNEL_ONLY: &str = "This command can only be run from the admin channel.";
const INVALID_PARENT_ROUND: &str = "parent_round should be one of the round channels.";

const ANSWER_HEADER: [&str; 3] = ["Title", "Answer", "Google sheet"];
const SHEET_URL_BASE: &str = "https://docs.google.com/spreadsheets/d/";

/// Field changed by [`HuntCommand::Edit`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditField {
    Name(String),
    Url(String),
    SheetId(String),
}

/// A command that operates on an existing hunt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HuntCommand {
    /// Add a puzzle under `parent_round`, or next to the puzzle whose channel
    /// the command ran in.
    AddPuzzle {
        name: String,
        url: String,
        parent_round: Option<ChannelId>,
    },
    /// Add a round under `parent_round` or the current round channel; top
    /// level otherwise.
    AddRound {
        name: String,
        url: String,
        parent_round: Option<ChannelId>,
    },
    Solve {
        answer: String,
    },
    /// Write the answers of every puzzle under the round owning `round`
    /// into a tab of the current puzzle's sheet.
    PopulateAnswers {
        round: ChannelId,
    },
    Unsolve,
    /// Set the status, or clear it when `None` or empty.
    UpdateStatus {
        status: Option<String>,
    },
    Edit(EditField),
    /// Re-derive every chat resource from the document.
    SyncAll,
    /// Copy the hunt into a fresh document and report its id.
    CopyToNewDocument,
    /// Point the guild at another document.
    ChangeBackingDocument {
        document_id: DocumentId,
    },
}

/// A command issued from a guild.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Set up a new hunt in the guild.
    Create { name: String, folder_link: String },
    Hunt(HuntCommand),
}

impl HuntCommand {
    pub fn name(&self) -> &'static str {
        match self {
            Self::AddPuzzle { .. } => "add_puzzle",
            Self::AddRound { .. } => "add_round",
            Self::Solve { .. } => "solve",
            Self::PopulateAnswers { .. } => "populate_answers",
            Self::Unsolve => "unsolve",
            Self::UpdateStatus { .. } => "update_status",
            Self::Edit(_) => "edit",
            Self::SyncAll => "resync_all",
            Self::CopyToNewDocument => "copy_to_new_fluid_file",
            Self::ChangeBackingDocument { .. } => "change_backing_fluid_file",
        }
    }
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Create { .. } => "create",
            Self::Hunt(command) => command.name(),
        }
    }
}

/// An open hunt bound to the guild a command came from.
pub struct HuntSession {
    pub hunt: Puzzlehunt,
    pub guild: Arc<dyn Guild>,
    pub context: HuntContext,
    pub queue: Arc<DocumentQueue>,
    pub documents: Arc<dyn DocumentService>,
    pub sheets: Arc<dyn SheetService>,
}

/// The round or puzzle whose channel is `channel`.
///
/// Rounds match their category or index channel, puzzles their text channel.
pub fn associated_node(snapshot: &Snapshot, channel: &ChannelId) -> Option<NodeHandle> {
    let nodes = walk(snapshot);
    let round = nodes.iter().find(|node| match node {
        NodeHandle::Round(round) => round.association().is_some_and(|association| {
            &association.channel_id == channel || &association.index_channel_id == channel
        }),
        _ => false,
    });
    let puzzle = || {
        nodes.iter().find(|node| match node {
            NodeHandle::Puzzle(puzzle) => puzzle
                .association()
                .is_some_and(|association| &association.channel_id == channel),
            _ => false,
        })
    };
    round.or_else(puzzle).cloned()
}

fn puzzle_in_channel(snapshot: &Snapshot, channel: &ChannelId) -> Option<PuzzleHandle> {
    match associated_node(snapshot, channel)? {
        NodeHandle::Puzzle(puzzle) => Some(puzzle),
        _ => None,
    }
}

/// Resolve the round a new node goes under.
///
/// `Err` carries the reply for an argument that names no round.
fn parent_round(
    snapshot: &Snapshot,
    channel: &ChannelId,
    argument: Option<&ChannelId>,
) -> std::result::Result<Option<NodeId>, &'static str> {
    if let Some(argument) = argument {
        return walk(snapshot)
            .into_iter()
            .find_map(|node| match node {
                NodeHandle::Round(round)
                    if round.association().is_some_and(|association| {
                        &association.index_channel_id == argument
                            || &association.channel_id == argument
                    }) =>
                {
                    Some(round.id().clone())
                }
                _ => None,
            })
            .map(Some)
            .ok_or(INVALID_PARENT_ROUND);
    }
    Ok(match associated_node(snapshot, channel) {
        Some(NodeHandle::Puzzle(puzzle)) => puzzle.round_id(),
        Some(NodeHandle::Round(round)) => Some(round.id().clone()),
        _ => None,
    })
}

/// Puzzles anywhere below `round`, depth first in child order.
fn descendant_puzzles(round: &RoundHandle) -> Vec<PuzzleHandle> {
    round
        .children()
        .into_iter()
        .flat_map(|child| match child {
            NodeHandle::Puzzle(puzzle) => vec![puzzle],
            NodeHandle::Round(inner) => descendant_puzzles(&inner),
            NodeHandle::Str(_) | NodeHandle::Num(_) => Vec::new(),
        })
        .collect()
}

/// Header plus one `title, answer, sheet link` row per puzzle. Titles and
/// links are sheet formulas.
fn answer_rows(puzzles: &[PuzzleHandle]) -> Vec<Vec<String>> {
    let header: Vec<String> = ANSWER_HEADER.iter().map(ToString::to_string).collect();
    let rows = puzzles.iter().map(|puzzle| {
        let sheet = puzzle
            .sheet_id()
            .map(|sheet_id| format!("=hyperlink(\"{SHEET_URL_BASE}{sheet_id}\",\"Link\")"))
            .unwrap_or_default();
        vec![
            format!("=hyperlink(\"{}\", \"{}\")", puzzle.url(), puzzle.name()),
            puzzle.answer().unwrap_or_default().to_string(),
            sheet,
        ]
    });
    std::iter::once(header).chain(rows).collect()
}

/// Fill the feeder answer tab for `round` in `sheet_id`, creating it when
/// missing. Returns the reply for the user.
async fn populate_answers(sheets: &dyn SheetService, sheet_id: &str, round: &RoundHandle) -> Result<String> {
    let title = format!("{} Feeder Answers", round.name());
    let existing = sheets
        .tabs(sheet_id)
        .await?
        .into_iter()
        .find(|tab| tab.title == title);
    let tab = match existing {
        Some(tab) => {
            let header = sheets.header(sheet_id, &title).await?;
            if !header.is_empty() && header != ANSWER_HEADER {
                return Ok(format!(
                    "The \"{title}\" tab does not match the headers generated by the bot. \
                     Rename or delete it and re-run this command."
                ));
            }
            tab
        }
        None => sheets.add_tab(sheet_id, &title).await?,
    };

    let rows = answer_rows(&descendant_puzzles(round));
    sheets.write_rows(sheet_id, &title, &rows).await?;
    info!(sheet_id, tab = %title, puzzles = rows.len().saturating_sub(1), "Populated feeder answers");
    Ok(format!(
        "Answers populated on the [{title}]({SHEET_URL_BASE}{sheet_id}/edit?gid={}) tab.",
        tab.id
    ))
}

/// Post to a logging channel. A missing channel is logged and skipped.
async fn post_log(guild: &dyn Guild, channel: Option<&ChannelId>, content: String) {
    let Some(channel) = channel else {
        return;
    };
    if let Err(error) = guild.send_message(channel, NewMessage::text(content)).await {
        warn!(channel_id = %channel, error = %error, "Failed to post to logging channel");
    }
}

/// Run a hunt command in the context of `interaction`'s channel.
///
/// # Errors
///
/// Fails when a document edit or a reply fails. Validation problems are
/// answered in the interaction and are not errors.
pub async fn execute(
    session: &HuntSession,
    command: HuntCommand,
    interaction: &dyn Interaction,
) -> Result<()> {
    let hunt = &session.hunt;
    let channel = interaction.channel_id();
    info!(
        command = command.name(),
        guild_id = %interaction.guild_id(),
        channel_id = %channel,
        "Executing command"
    );

    match command {
        HuntCommand::AddPuzzle {
            name,
            url,
            parent_round: argument,
        } => {
            let round = match parent_round(&hunt.snapshot(), channel, argument.as_ref()) {
                Ok(Some(round)) => round,
                Ok(None) => {
                    return interaction
                        .reply("Either run this command from a puzzle channel (to create a sibling puzzle) or specify the parent_round argument.")
                        .await;
                }
                Err(problem) => return interaction.reply(problem).await,
            };
            hunt.add_puzzle(&name, &url, &round)?;
            interaction.reply(&format!("Puzzle \"{name}\" added.")).await
        }

        HuntCommand::AddRound {
            name,
            url,
            parent_round: argument,
        } => {
            let round = match parent_round(&hunt.snapshot(), channel, argument.as_ref()) {
                Ok(round) => round,
                Err(problem) => return interaction.reply(problem).await,
            };
            hunt.add_round(&name, &url, round.as_ref())?;
            interaction.reply(&format!("Round \"{name}\" added.")).await
        }

        HuntCommand::Solve { answer } => {
            let Some(puzzle) = puzzle_in_channel(&hunt.snapshot(), channel) else {
                return interaction.reply(NOT_A_PUZZLE_CHANNEL).await;
            };
            hunt.solve(puzzle.id(), Some(&answer))?;
            if puzzle.status().is_some() {
                hunt.clear_status(puzzle.id())?;
            }
            let LoggingChannels { puzzle_solve, .. } = hunt.logging_channels();
            post_log(
                session.guild.as_ref(),
                puzzle_solve.as_ref(),
                format!("{} solved! Answer: \"{answer}\".", puzzle.name()),
            )
            .await;
            interaction
                .reply(&format!("Puzzle solved with \"{answer}\"."))
                .await
        }

        HuntCommand::PopulateAnswers { round } => {
            let snapshot = hunt.snapshot();
            let Some(puzzle) = puzzle_in_channel(&snapshot, channel) else {
                return interaction
                    .reply("This command must be run from a puzzle channel.")
                    .await;
            };
            let Some(sheet_id) = puzzle.sheet_id() else {
                return interaction
                    .reply("Please wait for this puzzle's sheet to be created and retry.")
                    .await;
            };
            let Some(NodeHandle::Round(round)) = associated_node(&snapshot, &round) else {
                return interaction
                    .reply("Unable to find puzzle round associated with this category. Please select a different one.")
                    .await;
            };
            let reply = populate_answers(session.sheets.as_ref(), sheet_id, &round).await?;
            interaction.reply(&reply).await
        }

        HuntCommand::Unsolve => {
            let Some(puzzle) = puzzle_in_channel(&hunt.snapshot(), channel) else {
                return interaction.reply(NOT_A_PUZZLE_CHANNEL).await;
            };
            hunt.solve(puzzle.id(), None)?;
            interaction.reply("Success!").await
        }

        HuntCommand::UpdateStatus { status } => {
            let Some(puzzle) = puzzle_in_channel(&hunt.snapshot(), channel) else {
                return interaction.reply(NOT_A_PUZZLE_CHANNEL).await;
            };
            let status = status.filter(|status| !status.is_empty());
            let log = match &status {
                Some(status) => {
                    hunt.update_status(puzzle.id(), status)?;
                    format!("Status updated for {}: \"{status}\".", puzzle.name())
                }
                None => {
                    hunt.clear_status(puzzle.id())?;
                    format!("Status cleared for {}.", puzzle.name())
                }
            };
            let LoggingChannels {
                puzzle_status_update,
                ..
            } = hunt.logging_channels();
            post_log(session.guild.as_ref(), puzzle_status_update.as_ref(), log).await;
            interaction.reply("Puzzle status updated.").await
        }

        HuntCommand::Edit(field) => {
            let Some(node) = associated_node(&hunt.snapshot(), channel) else {
                return interaction
                    .reply("This command must be run from a puzzle or round channel.")
                    .await;
            };
            match field {
                EditField::Name(name) => hunt.change_name(node.id(), &name)?,
                EditField::Url(url) => {
                    if url::Url::parse(&url).is_err() {
                        return interaction.reply("Invalid URL.").await;
                    }
                    hunt.change_url(node.id(), &url)?;
                }
                EditField::SheetId(sheet_id) => {
                    if !matches!(node, NodeHandle::Puzzle(_)) {
                        return interaction
                            .reply("This command can only be run from a puzzle channel.")
                            .await;
                    }
                    hunt.augment_with_sheet(node.id(), &sheet_id)?;
                }
            }
            interaction.reply("Updated.").await
        }

        HuntCommand::SyncAll => {
            if channel != &session.context.admin_channel_id {
                return interaction.reply(ADMIN_CHANNEL_ONLY).await;
            }
            interaction
                .reply("Re-syncing all discord state to reflect the Fluid file. This may take a while...")
                .await?;
            match session.queue.resync().await {
                Ok(report) if report.all_succeeded() => interaction.reply("Complete!").await,
                Ok(report) => {
                    interaction
                        .reply(&format!(
                            "Complete, but {} actions failed. Check the logs for details.",
                            report.actions_failed.len()
                        ))
                        .await
                }
                Err(error) => {
                    warn!(error = %error, "Full resync failed");
                    interaction
                        .reply("Something went wrong while resyncing.")
                        .await
                }
            }
        }

        HuntCommand::CopyToNewDocument => {
            if channel != &session.context.admin_channel_id {
                return interaction.reply(ADMIN_CHANNEL_ONLY).await;
            }
            interaction
                .reply("Creating new fluid file using the existing hunt data...")
                .await?;
            let copy = Puzzlehunt::create(session.documents.as_ref()).await?;
            let copied = copy.copy_from(&hunt.snapshot());
            let id = copy.id().clone();
            copy.dispose();
            copied?;
            info!(from = %hunt.id(), to = %id, "Copied hunt to a new document");
            interaction
                .reply(&format!(
                    "Existing puzzlehunt data has been copied to a new fluid file with id: {id}. \
                     Run /change_backing_fluid_file with this id to switch the discord server to use that file instead."
                ))
                .await
        }

        HuntCommand::ChangeBackingDocument { document_id } => {
            let HuntContext {
                context,
                admin_channel_id,
                message_id,
            } = &session.context;
            if channel != admin_channel_id {
                return interaction.reply(ADMIN_CHANNEL_ONLY).await;
            }
            interaction
                .reply("Switching backing file for the discord server...")
                .await?;
            let previous = context.fluid_file_id.clone();
            let replaced = SerializedHuntContext {
                fluid_file_id: document_id,
                ..context.clone()
            };
            session
                .guild
                .edit_message(
                    admin_channel_id,
                    message_id,
                    NewMessage::text(replaced.to_message()?),
                )
                .await?;
            interaction
                .reply(&format!(
                    "Complete! To revert this change, rerun this command using the old file id: {previous}."
                ))
                .await
        }
    }
}

/// Extract the folder id from a Drive folder share link.
///
/// # Errors
///
/// Fails only if the link pattern does not compile.
pub fn drive_folder_id(link: &str) -> Result<Option<String>> {
    let pattern = Regex::new(DRIVE_FOLDER_PATTERN)?;
    Ok(pattern
        .captures(link)
        .and_then(|captures| captures.get(1))
        .map(|folder| folder.as_str().to_owned()))
}

/// Set up a new hunt in `guild`: admin channel, index and log categories,
/// the all-puzzles role, log channels and a fresh document, then pin the
/// context in the admin channel.
///
/// # Errors
///
/// Fails when a platform call, the document service or a reply fails.
pub async fn create_hunt(
    guild: &dyn Guild,
    bot: &UserId,
    documents: &dyn DocumentService,
    name: &str,
    folder_link: &str,
    interaction: &dyn Interaction,
) -> Result<()> {
    interaction.reply("Creating puzzle hunt...").await?;

    let existing = guild
        .channels()
        .await?
        .into_iter()
        .any(|channel| channel.name == ADMIN_CHANNEL_NAME);
    if existing {
        return interaction
            .reply(&format!(
                "Existing puzzle hunt was found on this server.\nIf this was a mistake, delete the channel {ADMIN_CHANNEL_NAME} and rerun."
            ))
            .await;
    }
    let Some(google_folder_id) = drive_folder_id(folder_link)? else {
        return interaction
            .reply("Invalid Google Drive folder link. Please use the link obtained from using \"get link\" on the folder UI.")
            .await;
    };

    let everyone = guild.id().everyone_role();
    let admin_overwrites = vec![
        Overwrite::deny_role(&everyone, VIEW_CHANNEL),
        Overwrite::allow_member(bot, VIEW_CHANNEL),
    ];
    let (admin_channel, index_category, log_category, all_puzzles_role) = futures::try_join!(
        guild.create_channel(NewChannel::text(ADMIN_CHANNEL_NAME).with_overwrites(admin_overwrites)),
        guild.create_channel(NewChannel::category("Puzzle Index")),
        guild.create_channel(NewChannel::category("Logs")),
        guild.create_role("All Puzzles"),
    )?;

    let log_overwrites = vec![
        Overwrite::deny_role(&everyone, SEND_MESSAGES),
        Overwrite::allow_member(bot, SEND_MESSAGES),
    ];
    let log_channel = |name: &str| {
        NewChannel::text(name)
            .with_parent(Some(log_category.id.clone()))
            .with_overwrites(log_overwrites.clone())
    };
    let (add_solve_channel, update_channel) = futures::try_join!(
        guild.create_channel(log_channel("puzzle-add-solves")),
        guild.create_channel(log_channel("puzzle-updates")),
    )?;

    let hunt = Puzzlehunt::create(documents).await?;
    let initialized = hunt.set_guild_id(guild.id()).and_then(|()| {
        hunt.set_logging_channels(&LoggingChannels {
            puzzle_add: Some(add_solve_channel.id.clone()),
            puzzle_solve: Some(add_solve_channel.id),
            puzzle_status_update: Some(update_channel.id),
        })
    });
    let document_id = hunt.id().clone();
    hunt.dispose();
    initialized?;

    let context = SerializedHuntContext {
        fluid_file_id: document_id,
        google_folder_id,
        index_id: index_category.id,
        name: name.to_owned(),
        all_puzzles_role_id: all_puzzles_role,
    };
    let message = guild
        .send_message(&admin_channel.id, NewMessage::text(context.to_message()?))
        .await?;
    guild.pin_message(&admin_channel.id, &message.id).await?;

    info!(
        guild_id = %guild.id(),
        document_id = %context.fluid_file_id,
        "Created puzzle hunt"
    );
    interaction.reply("Puzzle hunt created!").await
}
