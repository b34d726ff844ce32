//! Commands and platform events driven through the client end to end.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use std::sync::Arc;

use belle_core::{ChannelId, GuildId, RoleId};
use belle_model::{DocumentService, InMemoryDocumentService, NodeId, PuzzleHandle};
use belle_reconciler::embeds::{HIDE_PUZZLES, SHOW_PUZZLES, TOGGLE_ALL, TOGGLE_ROUND};
use belle_reconciler::{
    Channel, ChannelKind, ChatPlatform, Component, Guild, InMemoryGuild, InMemoryPlatform,
    InMemorySheets, SheetService,
};
use belle_runtime::{
    BelleClient, ChannelUpdate, ClientConfig, Command, ComponentAction, EditField, GuildFilter,
    HuntCommand, HuntSession, RecordingInteraction, ADMIN_CHANNEL_NAME,
};

const FOLDER_LINK: &str = "https://drive.google.com/drive/folders/folder-id?usp=sharing";

struct Bot {
    client: Arc<BelleClient>,
    platform: Arc<InMemoryPlatform>,
    guild: Arc<InMemoryGuild>,
    sheets: Arc<InMemorySheets>,
}

impl Bot {
    fn new() -> Self {
        Self::with_config(ClientConfig::default())
    }

    fn with_config(config: ClientConfig) -> Self {
        let platform = Arc::new(InMemoryPlatform::new("bot"));
        let guild = platform.add_guild("guild");
        let documents: Arc<dyn DocumentService> = Arc::new(InMemoryDocumentService::new());
        let sheets = Arc::new(InMemorySheets::new());
        let client = BelleClient::new(
            platform.clone() as Arc<dyn ChatPlatform>,
            documents,
            sheets.clone(),
            config,
        );
        Self {
            client,
            platform,
            guild,
            sheets,
        }
    }

    /// Issue a command from `channel` and wait for everything it triggers.
    async fn run(&self, command: Command, channel: &ChannelId) -> Arc<RecordingInteraction> {
        self.run_in("guild", command, channel).await
    }

    async fn run_in(
        &self,
        guild: &str,
        command: Command,
        channel: &ChannelId,
    ) -> Arc<RecordingInteraction> {
        let interaction = Arc::new(RecordingInteraction::new(
            GuildId::new(guild),
            channel.clone(),
            "player".into(),
        ));
        self.client.dispatch_command(command, interaction.clone());
        self.client.ensure_pending_work_processed().await;
        interaction
    }

    async fn hunt(&self, command: HuntCommand, channel: &ChannelId) -> Option<String> {
        self.run(Command::Hunt(command), channel)
            .await
            .last_reply()
    }

    async fn create(&self) -> ChannelId {
        let reply = self
            .run(
                Command::Create {
                    name: "Mystery Hunt".into(),
                    folder_link: FOLDER_LINK.into(),
                },
                &"general".into(),
            )
            .await;
        assert_eq!(reply.last_reply().as_deref(), Some("Puzzle hunt created!"));
        self.named(ADMIN_CHANNEL_NAME).id
    }

    fn named(&self, name: &str) -> Channel {
        self.guild
            .channel_named(name)
            .unwrap_or_else(|| panic!("no channel named {name}"))
    }

    fn has_channel(&self, name: &str) -> bool {
        self.guild.channel_named(name).is_some()
    }

    fn log_messages(&self, channel: &str) -> Vec<String> {
        self.guild
            .messages(&self.named(channel).id)
            .into_iter()
            .map(|message| message.content)
            .collect()
    }

    /// Create a hunt with round "Intro" holding puzzle "Mind Bender!".
    async fn seeded(&self) -> ChannelId {
        let admin = self.create().await;
        self.hunt(
            HuntCommand::AddRound {
                name: "Intro".into(),
                url: "https://hunt.example/intro".into(),
                parent_round: None,
            },
            &admin,
        )
        .await;
        let index = self.named("intro-puzzles").id;
        self.hunt(
            HuntCommand::AddPuzzle {
                name: "Mind Bender!".into(),
                url: "https://hunt.example/mb".into(),
                parent_round: Some(index),
            },
            &admin,
        )
        .await;
        admin
    }

    /// Press a button or submit a menu as "player" from `channel`.
    async fn press(&self, action: ComponentAction, channel: &ChannelId) -> Option<String> {
        let interaction = Arc::new(RecordingInteraction::new(
            "guild".into(),
            channel.clone(),
            "player".into(),
        ));
        self.client.dispatch_component(action, interaction.clone());
        self.client.ensure_pending_work_processed().await;
        interaction.last_reply()
    }

    async fn held_roles(&self) -> Vec<RoleId> {
        self.guild
            .member_roles(&"player".into())
            .await
            .unwrap()
            .unwrap_or_default()
    }

    async fn session(&self) -> HuntSession {
        self.client
            .open_guild(&"guild".into())
            .await
            .unwrap()
            .unwrap()
    }

    async fn puzzle(&self, name: &str) -> PuzzleHandle {
        self.session()
            .await
            .hunt
            .puzzles()
            .into_iter()
            .find(|puzzle| puzzle.name() == name)
            .unwrap_or_else(|| panic!("no puzzle named {name}"))
    }

    async fn round_role(&self, name: &str) -> RoleId {
        self.session()
            .await
            .hunt
            .rounds()
            .into_iter()
            .find(|round| round.name() == name)
            .and_then(|round| round.association())
            .unwrap_or_else(|| panic!("no associated round named {name}"))
            .role_id
    }

    async fn puzzle_round(&self, name: &str) -> Option<NodeId> {
        self.puzzle(name).await.round_id()
    }
}

#[tokio::test]
async fn test_create_sets_up_guild() {
    let bot = Bot::new();
    let admin = bot.create().await;

    for name in ["Puzzle Index", "Logs", "puzzle-add-solves", "puzzle-updates"] {
        assert!(bot.has_channel(name), "missing {name}");
    }
    let logs = bot.named("Logs").id;
    assert_eq!(bot.named("puzzle-updates").parent_id, Some(logs));
    assert_eq!(bot.named(ADMIN_CHANNEL_NAME).overwrites.len(), 2);

    let pinned = bot.guild.messages(&admin);
    assert_eq!(pinned.len(), 1);
    assert!(pinned[0].pinned);
    let context: serde_json::Value = serde_json::from_str(&pinned[0].content).unwrap();
    assert_eq!(context["name"], "Mystery Hunt");
    assert_eq!(context["googleFolderId"], "folder-id");
    assert_eq!(context["indexId"], bot.named("Puzzle Index").id.as_str());
}

#[tokio::test]
async fn test_create_refuses_existing_hunt_and_bad_links() {
    let bot = Bot::new();
    bot.create().await;

    let again = bot
        .run(
            Command::Create {
                name: "Again".into(),
                folder_link: FOLDER_LINK.into(),
            },
            &"general".into(),
        )
        .await;
    assert!(again
        .last_reply()
        .unwrap()
        .starts_with("Existing puzzle hunt was found on this server."));

    let other = Bot::new();
    let bad = other
        .run(
            Command::Create {
                name: "Hunt".into(),
                folder_link: "https://example.com/folder".into(),
            },
            &"general".into(),
        )
        .await;
    assert!(bad
        .last_reply()
        .unwrap()
        .starts_with("Invalid Google Drive folder link."));
    assert!(!other.has_channel(ADMIN_CHANNEL_NAME));
}

#[tokio::test]
async fn test_hunt_commands_need_a_hunt() {
    let bot = Bot::new();
    let reply = bot.hunt(HuntCommand::Unsolve, &"general".into()).await;
    assert_eq!(
        reply.as_deref(),
        Some("No puzzle hunt was found on this server. Create one with \"/create\".")
    );
}

#[tokio::test]
async fn test_added_round_and_puzzle_get_channels() {
    let bot = Bot::new();
    bot.seeded().await;

    let category = bot.named("intro");
    assert_eq!(category.kind, ChannelKind::Category);
    assert_eq!(
        bot.named("intro-puzzles").parent_id,
        Some(bot.named("Puzzle Index").id)
    );
    assert_eq!(bot.named("mind-bender").parent_id, Some(category.id));
    assert_eq!(bot.client.cache().len(), 1);
}

#[tokio::test]
async fn test_add_puzzle_parent_resolution() {
    let bot = Bot::new();
    let admin = bot.seeded().await;

    let missing_parent = bot
        .hunt(
            HuntCommand::AddPuzzle {
                name: "Orphan".into(),
                url: String::new(),
                parent_round: None,
            },
            &admin,
        )
        .await;
    assert!(missing_parent
        .unwrap()
        .starts_with("Either run this command from a puzzle channel"));

    let wrong_parent = bot
        .hunt(
            HuntCommand::AddPuzzle {
                name: "Orphan".into(),
                url: String::new(),
                parent_round: Some(admin.clone()),
            },
            &admin,
        )
        .await;
    assert_eq!(
        wrong_parent.as_deref(),
        Some("parent_round should be one of the round channels.")
    );

    let sibling = bot
        .hunt(
            HuntCommand::AddPuzzle {
                name: "Sibling".into(),
                url: "https://hunt.example/s".into(),
                parent_round: None,
            },
            &bot.named("mind-bender").id,
        )
        .await;
    assert_eq!(sibling.as_deref(), Some("Puzzle \"Sibling\" added."));
    assert_eq!(bot.named("sibling").parent_id, Some(bot.named("intro").id));
}

#[tokio::test]
async fn test_solve_renames_and_logs() {
    let bot = Bot::new();
    bot.seeded().await;
    let puzzle = bot.named("mind-bender").id;

    let reply = bot
        .hunt(
            HuntCommand::UpdateStatus {
                status: Some("backsolving".into()),
            },
            &puzzle,
        )
        .await;
    assert_eq!(reply.as_deref(), Some("Puzzle status updated."));

    let reply = bot
        .hunt(
            HuntCommand::Solve {
                answer: "42".into(),
            },
            &puzzle,
        )
        .await;
    assert_eq!(reply.as_deref(), Some("Puzzle solved with \"42\"."));
    assert_eq!(bot.guild.channel(&puzzle).await.unwrap().unwrap().name, "solved-mind-bender");

    assert_eq!(
        bot.log_messages("puzzle-add-solves"),
        vec!["Mind Bender! solved! Answer: \"42\".".to_owned()]
    );
    assert_eq!(
        bot.log_messages("puzzle-updates"),
        vec!["Status updated for Mind Bender!: \"backsolving\".".to_owned()]
    );

    let reply = bot.hunt(HuntCommand::Unsolve, &puzzle).await;
    assert_eq!(reply.as_deref(), Some("Success!"));
    assert_eq!(bot.guild.channel(&puzzle).await.unwrap().unwrap().name, "mind-bender");
}

#[tokio::test]
async fn test_puzzle_commands_outside_puzzle_channels() {
    let bot = Bot::new();
    let admin = bot.seeded().await;

    let reply = bot
        .hunt(
            HuntCommand::Solve {
                answer: "42".into(),
            },
            &admin,
        )
        .await;
    assert_eq!(reply.as_deref(), Some("No puzzle is associated with this channel!"));

    let reply = bot
        .hunt(HuntCommand::Edit(EditField::Name("New".into())), &admin)
        .await;
    assert_eq!(
        reply.as_deref(),
        Some("This command must be run from a puzzle or round channel.")
    );
}

#[tokio::test]
async fn test_edit_validates_input() {
    let bot = Bot::new();
    bot.seeded().await;
    let puzzle = bot.named("mind-bender").id;
    let round = bot.named("intro-puzzles").id;

    let reply = bot
        .hunt(HuntCommand::Edit(EditField::Url("not a url".into())), &puzzle)
        .await;
    assert_eq!(reply.as_deref(), Some("Invalid URL."));

    let reply = bot
        .hunt(HuntCommand::Edit(EditField::SheetId("sheet".into())), &round)
        .await;
    assert_eq!(
        reply.as_deref(),
        Some("This command can only be run from a puzzle channel.")
    );

    let reply = bot
        .hunt(HuntCommand::Edit(EditField::Name("Brain Twister".into())), &puzzle)
        .await;
    assert_eq!(reply.as_deref(), Some("Updated."));
    assert_eq!(bot.guild.channel(&puzzle).await.unwrap().unwrap().name, "brain-twister");
}

#[tokio::test]
async fn test_sync_all_only_from_admin_channel() {
    let bot = Bot::new();
    let admin = bot.seeded().await;

    let reply = bot
        .hunt(HuntCommand::SyncAll, &bot.named("mind-bender").id)
        .await;
    assert_eq!(
        reply.as_deref(),
        Some("This command can only be run from the admin channel.")
    );

    let before = bot.guild.mutation_count();
    let interaction = bot.run(Command::Hunt(HuntCommand::SyncAll), &admin).await;
    assert_eq!(interaction.replies().len(), 2);
    assert_eq!(interaction.last_reply().as_deref(), Some("Complete!"));
    assert_eq!(bot.guild.mutation_count(), before);
}

#[tokio::test]
async fn test_channel_move_moves_puzzle() {
    let bot = Bot::new();
    let admin = bot.seeded().await;
    bot.hunt(
        HuntCommand::AddRound {
            name: "Finale".into(),
            url: "https://hunt.example/finale".into(),
            parent_round: None,
        },
        &admin,
    )
    .await;

    let intro = bot.named("intro").id;
    let finale = bot.named("finale").id;
    let puzzle = bot.named("mind-bender").id;
    let intro_round = bot.puzzle_round("Mind Bender!").await;

    bot.guild.move_externally(&puzzle, Some(&finale));
    bot.client.dispatch_channel_update(ChannelUpdate {
        guild_id: "guild".into(),
        channel_id: puzzle.clone(),
        kind: ChannelKind::Text,
        old_parent: Some(intro),
        new_parent: Some(finale.clone()),
    });
    bot.client.ensure_pending_work_processed().await;

    let moved_round = bot.puzzle_round("Mind Bender!").await;
    assert_ne!(moved_round, intro_round);
    assert_eq!(bot.named("mind-bender").parent_id, Some(finale));
    let finale_overwrites = bot.named("finale").overwrites;
    let puzzle_overwrites = bot.named("mind-bender").overwrites;
    assert_eq!(puzzle_overwrites.len(), 5);
    assert!(finale_overwrites
        .iter()
        .all(|overwrite| puzzle_overwrites.iter().any(|o| o.id == overwrite.id)));
}

#[tokio::test]
async fn test_copy_and_change_backing_document() {
    let bot = Bot::new();
    let admin = bot.seeded().await;

    let reply = bot.hunt(HuntCommand::CopyToNewDocument, &admin).await.unwrap();
    let copy_id = reply
        .split("with id: ")
        .nth(1)
        .and_then(|rest| rest.split(". ").next())
        .unwrap()
        .to_owned();

    let reply = bot
        .hunt(
            HuntCommand::ChangeBackingDocument {
                document_id: copy_id.as_str().into(),
            },
            &admin,
        )
        .await
        .unwrap();
    assert!(reply.starts_with("Complete! To revert this change"));

    let session = bot.client.open_guild(&"guild".into()).await.unwrap().unwrap();
    assert_eq!(session.hunt.id().as_str(), copy_id);
    let names: Vec<String> = session
        .hunt
        .puzzles()
        .iter()
        .map(|puzzle| puzzle.name().to_owned())
        .collect();
    assert_eq!(names, vec!["Mind Bender!".to_owned()]);
}

#[tokio::test]
async fn test_failures_reply_with_generic_message() {
    let bot = Bot::new();
    let reply = bot
        .run_in("elsewhere", Command::Hunt(HuntCommand::Unsolve), &"general".into())
        .await;
    assert_eq!(
        reply.last_reply().as_deref(),
        Some("There was an error while executing a command!")
    );
}

#[tokio::test]
async fn test_filtered_guilds_are_ignored() {
    let bot = Bot::with_config(ClientConfig {
        guilds: GuildFilter {
            allowed: Vec::new(),
            blocked: vec!["guild".into()],
        },
        ..ClientConfig::default()
    });
    let interaction = Arc::new(RecordingInteraction::new(
        "guild".into(),
        "general".into(),
        "player".into(),
    ));
    assert!(bot
        .client
        .dispatch_command(Command::Hunt(HuntCommand::Unsolve), interaction.clone())
        .is_none());
    assert!(interaction.replies().is_empty());
    assert!(bot.platform.guild(&"guild".into()).await.unwrap().is_some());
}

#[tokio::test]
async fn test_shutdown_closes_documents() {
    let bot = Bot::new();
    bot.seeded().await;
    assert_eq!(bot.client.cache().len(), 1);

    bot.client.shutdown().await;
    assert!(bot.client.cache().is_empty());
}

#[tokio::test]
async fn test_round_index_offers_puzzle_menus() {
    let bot = Bot::new();
    bot.seeded().await;
    let puzzle = bot.puzzle("Mind Bender!").await;

    let pinned: Vec<_> = bot
        .guild
        .messages(&bot.named("intro-puzzles").id)
        .into_iter()
        .filter(|message| message.pinned)
        .collect();
    assert_eq!(pinned.len(), 1);
    let custom_ids: Vec<&str> = pinned[0]
        .components
        .iter()
        .flatten()
        .map(|component| match component {
            Component::Button { custom_id, .. } | Component::Select { custom_id, .. } => {
                custom_id.as_str()
            }
        })
        .collect();
    assert_eq!(custom_ids, vec![SHOW_PUZZLES, HIDE_PUZZLES, TOGGLE_ROUND, TOGGLE_ALL]);
    let Component::Select { options, .. } = &pinned[0].components[0][0] else {
        panic!("first row should be the join menu");
    };
    assert_eq!(options.len(), 1);
    assert_eq!(options[0].label, "Mind Bender!");
    assert_eq!(options[0].value, puzzle.id().as_str());
}

#[tokio::test]
async fn test_toggle_round_and_all_flip_roles() {
    let bot = Bot::new();
    bot.seeded().await;
    bot.guild.add_member(&"player".into(), Vec::new());
    let index = bot.named("intro-puzzles").id;
    let round_role = bot.round_role("Intro").await;
    let all_role = bot.session().await.context.context.all_puzzles_role_id;

    let reply = bot.press(ComponentAction::ToggleRound, &index).await;
    assert_eq!(reply.as_deref(), Some("All puzzles in this round are now visible."));
    assert_eq!(bot.held_roles().await, vec![round_role.clone()]);

    let reply = bot.press(ComponentAction::ToggleRound, &index).await;
    assert_eq!(
        reply.as_deref(),
        Some("Only selected puzzles in this round will now be visible.")
    );
    assert!(bot.held_roles().await.is_empty());

    let reply = bot.press(ComponentAction::ToggleAll, &index).await;
    assert_eq!(reply.as_deref(), Some("All channels are now visible."));
    assert_eq!(bot.held_roles().await, vec![all_role]);

    let reply = bot.press(ComponentAction::ToggleAll, &index).await;
    assert_eq!(reply.as_deref(), Some("Removed the \"all channels\" role."));
    assert!(bot.held_roles().await.is_empty());

    let reply = bot
        .press(ComponentAction::ToggleRound, &bot.named("mind-bender").id)
        .await;
    assert_eq!(
        reply.as_deref(),
        Some("This button only works in a round's index channel.")
    );
}

#[tokio::test]
async fn test_puzzle_menus_subscribe_and_unsubscribe() {
    let bot = Bot::new();
    bot.seeded().await;
    let index = bot.named("intro-puzzles").id;
    let round_role = bot.round_role("Intro").await;
    bot.guild.add_member(&"player".into(), vec![round_role.clone()]);
    let puzzle = bot.puzzle("Mind Bender!").await;
    let puzzle_role = puzzle.association().unwrap().role_id;

    let reply = bot
        .press(ComponentAction::ShowPuzzles(Vec::new()), &index)
        .await;
    assert_eq!(reply.as_deref(), Some("No channels selected."));

    let reply = bot
        .press(ComponentAction::ShowPuzzles(vec![puzzle.id().clone()]), &index)
        .await;
    assert_eq!(reply.as_deref(), Some("Subscribed to 1 channel."));
    assert!(bot.held_roles().await.contains(&puzzle_role));

    // Hiding also drops the round role that would keep the channel visible.
    let reply = bot
        .press(ComponentAction::HidePuzzles(vec![puzzle.id().clone()]), &index)
        .await;
    assert_eq!(reply.as_deref(), Some("Unsubscribed from 1 channel."));
    assert!(bot.held_roles().await.is_empty());
}

#[tokio::test]
async fn test_populate_answers_writes_feeder_tab() {
    let bot = Bot::new();
    let admin = bot.seeded().await;
    let channel = bot.named("mind-bender").id;
    let category = bot.named("intro").id;
    bot.hunt(HuntCommand::Solve { answer: "42".into() }, &channel).await;
    let sheet = bot.puzzle("Mind Bender!").await.sheet_id().unwrap().to_owned();

    let populate = || HuntCommand::PopulateAnswers {
        round: category.clone(),
    };
    let expected = format!(
        "Answers populated on the [Intro Feeder Answers](https://docs.google.com/spreadsheets/d/{sheet}/edit?gid=1) tab."
    );
    assert_eq!(bot.hunt(populate(), &channel).await, Some(expected.clone()));

    let rows = bot.sheets.rows(&sheet, "Intro Feeder Answers").unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0], ["Title", "Answer", "Google sheet"]);
    assert_eq!(
        rows[1],
        [
            "=hyperlink(\"https://hunt.example/mb\", \"Mind Bender!\")".to_owned(),
            "42".to_owned(),
            format!("=hyperlink(\"https://docs.google.com/spreadsheets/d/{sheet}\",\"Link\")"),
        ]
    );

    // Re-running reuses the tab.
    assert_eq!(bot.hunt(populate(), &channel).await, Some(expected));
    assert_eq!(bot.sheets.tabs(&sheet).await.unwrap().len(), 1);

    assert_eq!(
        bot.hunt(populate(), &admin).await.as_deref(),
        Some("This command must be run from a puzzle channel.")
    );
    let reply = bot
        .hunt(HuntCommand::PopulateAnswers { round: channel.clone() }, &channel)
        .await;
    assert!(reply.unwrap().starts_with("Unable to find puzzle round associated with this category."));
}

#[tokio::test]
async fn test_populate_answers_keeps_foreign_tabs() {
    let bot = Bot::new();
    bot.seeded().await;
    let channel = bot.named("mind-bender").id;
    let sheet = bot.puzzle("Mind Bender!").await.sheet_id().unwrap().to_owned();
    let foreign = vec![vec!["Name".to_owned(), "Notes".to_owned()]];
    bot.sheets.insert_tab(&sheet, "Intro Feeder Answers", foreign.clone());

    let reply = bot
        .hunt(
            HuntCommand::PopulateAnswers {
                round: bot.named("intro").id,
            },
            &channel,
        )
        .await
        .unwrap();
    assert!(reply.contains("does not match the headers generated by the bot"));
    assert_eq!(bot.sheets.rows(&sheet, "Intro Feeder Answers"), Some(foreign));
}
