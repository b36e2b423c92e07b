use std::sync::Arc;

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use client_core::{
    message_group_starts, ChatSession, ClientEvent, CommissionBackend, HttpBackend, KanbanBoard,
    MessageCache,
};
use shared::domain::{
    CharacterPolicy, CommissionId, CommissionStatus, FieldKind, FieldTemplate, MessageKind,
    PathChoice, UserId,
};
use storage::{NewOffer, Storage};

#[derive(Parser, Debug)]
#[command(about = "Command-line console for the commission server")]
struct Cli {
    #[arg(long, default_value = "http://127.0.0.1:8090")]
    server_url: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Sign in (creating the account if needed) and print the user id.
    Login { username: String },
    /// Print the active offer catalog.
    Offers,
    /// List the user's own commissions.
    Commissions {
        #[arg(long)]
        user_id: i64,
    },
    /// Print the admin status board grouped into its columns.
    Board {
        #[arg(long)]
        user_id: i64,
    },
    /// Move a commission to a new status (admin only).
    SetStatus {
        #[arg(long)]
        user_id: i64,
        #[arg(long)]
        commission_id: i64,
        #[arg(long)]
        status: String,
    },
    /// Set the final quoted price of a commission (admin only).
    SetPrice {
        #[arg(long)]
        user_id: i64,
        #[arg(long)]
        commission_id: i64,
        #[arg(long)]
        price: f64,
    },
    /// Print the newest page of a commission chat, then follow it live.
    Chat {
        #[arg(long)]
        user_id: i64,
        #[arg(long)]
        commission_id: i64,
        #[arg(long, default_value_t = false)]
        follow: bool,
    },
    /// Send a text message to a commission chat.
    Send {
        #[arg(long)]
        user_id: i64,
        #[arg(long)]
        commission_id: i64,
        message: String,
    },
    /// Insert a catalog offer directly into the database.
    SeedOffer {
        #[arg(long, default_value = "sqlite://./data/commissions.db")]
        database_url: String,
        #[arg(long)]
        category: String,
        #[arg(long)]
        commission_type: String,
        #[arg(long)]
        subtype: Option<String>,
        #[arg(long)]
        base_price: f64,
        #[arg(long)]
        max_characters: Option<u32>,
        #[arg(long, default_value_t = 0.0)]
        extra_character_price: f64,
        /// Addon as name:kind:price, e.g. background:boolean:25
        #[arg(long)]
        addon: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().init();
    let cli = Cli::parse();

    match cli.command {
        Command::SeedOffer {
            database_url,
            category,
            commission_type,
            subtype,
            base_price,
            max_characters,
            extra_character_price,
            addon,
        } => {
            return seed_offer(
                &database_url,
                category,
                commission_type,
                subtype,
                base_price,
                max_characters,
                extra_character_price,
                addon,
            )
            .await;
        }
        other => run_command(&cli.server_url, other).await?,
    }

    Ok(())
}

async fn run_command(server_url: &str, command: Command) -> Result<()> {
    let backend = Arc::new(HttpBackend::new(server_url)?);

    match command {
        Command::SeedOffer { .. } => unreachable!("handled before connecting"),
        Command::Login { username } => {
            let session = backend.login(&username).await?;
            println!(
                "logged in as user_id={} username={} admin={}",
                session.user_id.0, session.username, session.is_admin
            );
        }
        Command::Offers => {
            for offer in backend.list_offers().await? {
                let subtype = offer
                    .subtype
                    .as_ref()
                    .map(|choice| format!(" / {}", choice.name))
                    .unwrap_or_default();
                println!(
                    "[{}] {} / {}{} base={}",
                    offer.id.0, offer.category.name, offer.commission_type.name, subtype,
                    offer.base_price
                );
            }
        }
        Command::Commissions { user_id } => {
            for commission in backend.list_commissions(UserId(user_id)).await? {
                println!(
                    "[{}] {} / {} status={} total={}",
                    commission.id.0,
                    commission.category_name,
                    commission.type_name,
                    commission.status.as_str(),
                    commission.total_price
                );
            }
        }
        Command::Board { user_id } => {
            let items = backend.list_all_commissions(UserId(user_id)).await?;
            let board = KanbanBoard::new(items);
            for (status, column) in board.grouped() {
                println!("== {} ({})", status.as_str(), column.len());
                for item in column {
                    println!(
                        "  [{}] {} / {} client={} total={}",
                        item.commission.id.0,
                        item.commission.category_name,
                        item.commission.type_name,
                        item.client_name.as_deref().unwrap_or("?"),
                        item.commission.total_price
                    );
                }
            }
        }
        Command::SetStatus {
            user_id,
            commission_id,
            status,
        } => {
            let status = CommissionStatus::parse(&status)
                .ok_or_else(|| anyhow!("unknown status '{status}'"))?;
            let updated = backend
                .update_status(UserId(user_id), CommissionId(commission_id), status)
                .await?;
            println!(
                "commission {} is now {}",
                updated.id.0,
                updated.status.as_str()
            );
        }
        Command::SetPrice {
            user_id,
            commission_id,
            price,
        } => {
            let updated = backend
                .set_final_price(UserId(user_id), CommissionId(commission_id), price)
                .await?;
            println!(
                "commission {} final price {:?} (computed total {})",
                updated.id.0, updated.final_price, updated.total_price
            );
        }
        Command::Chat {
            user_id,
            commission_id,
            follow,
        } => {
            let commission_id = CommissionId(commission_id);
            let mut chat = ChatSession::new(commission_id, Arc::new(MessageCache::new()));
            let as_backend: Arc<dyn CommissionBackend> = backend.clone();
            chat.initial_load(&as_backend, UserId(user_id)).await?;

            let starts = message_group_starts(chat.messages());
            for (message, is_start) in chat.messages().iter().zip(starts) {
                if is_start {
                    println!(
                        "-- {} at {}",
                        message.sender_name.as_deref().unwrap_or("?"),
                        message.sent_at.format("%H:%M")
                    );
                }
                match message.kind {
                    MessageKind::StatusUpdate => println!(
                        "   * status changed to {}",
                        message.content.as_deref().unwrap_or("?")
                    ),
                    _ => println!(
                        "   {}",
                        message
                            .content
                            .as_deref()
                            .or(message.file_url.as_deref())
                            .unwrap_or("")
                    ),
                }
            }

            if follow {
                let mut events = backend.subscribe_events();
                backend.spawn_ws_events(UserId(user_id), Some(commission_id))?;
                while let Ok(event) = events.recv().await {
                    match event {
                        ClientEvent::Server(event) => {
                            chat.apply_event(&event);
                            println!("{}", serde_json::to_string(&event)?);
                        }
                        ClientEvent::Error(message) => {
                            eprintln!("feed error: {message}");
                            break;
                        }
                    }
                }
            }
        }
        Command::Send {
            user_id,
            commission_id,
            message,
        } => {
            let sent = backend
                .send_message(
                    UserId(user_id),
                    CommissionId(commission_id),
                    MessageKind::Text,
                    Some(message),
                    None,
                )
                .await?;
            println!("sent message {}", sent.message_id.0);
        }
    }

    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn seed_offer(
    database_url: &str,
    category: String,
    commission_type: String,
    subtype: Option<String>,
    base_price: f64,
    max_characters: Option<u32>,
    extra_character_price: f64,
    addons: Vec<String>,
) -> Result<()> {
    let storage = Storage::new(database_url).await?;
    let addons = addons
        .iter()
        .map(|raw| parse_field_template(raw))
        .collect::<Result<Vec<_>>>()?;

    let offer_id = storage
        .insert_offer(&NewOffer {
            category: PathChoice::named(category),
            commission_type: PathChoice::named(commission_type),
            subtype: subtype.map(PathChoice::named),
            base_price,
            description: None,
            character_count: max_characters.map(|max| CharacterPolicy {
                max,
                price_per_extra: extra_character_price,
            }),
            comm_specific_inputs: Vec::new(),
            addons,
            sort_order: 0,
        })
        .await?;
    println!("created offer_id={}", offer_id.0);
    Ok(())
}

fn parse_field_template(raw: &str) -> Result<FieldTemplate> {
    let mut parts = raw.splitn(3, ':');
    let name = parts
        .next()
        .filter(|name| !name.is_empty())
        .ok_or_else(|| anyhow!("addon '{raw}' is missing a name"))?;
    let kind = parts
        .next()
        .and_then(FieldKind::parse)
        .ok_or_else(|| anyhow!("addon '{raw}' needs kind boolean, text or list"))?;
    let price = parts.next().map(str::parse::<f64>).transpose()?;
    Ok(FieldTemplate {
        name: name.to_string(),
        kind,
        price,
    })
}
