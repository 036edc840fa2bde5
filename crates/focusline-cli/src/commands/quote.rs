//! Quote collection commands.

use std::error::Error;

use clap::Subcommand;
use focusline_core::{Quote, RecordId};

use super::{print_json, settle};
use crate::app::App;

#[derive(Subcommand)]
pub enum QuoteAction {
    /// Save a quote
    Add {
        /// Quote text
        content: String,
        #[arg(long)]
        author: Option<String>,
        #[arg(long)]
        category: Option<String>,
    },
    /// List quotes, newest first
    List {
        /// Skip refreshing from the remote store
        #[arg(long)]
        offline: bool,
    },
    /// Delete a quote
    Delete {
        /// Quote ID
        id: String,
    },
    /// Push local-only quotes to the remote store
    Sync,
}

pub async fn run(action: QuoteAction, app: &App) -> Result<(), Box<dyn Error>> {
    let quotes = app.collection::<Quote>()?;
    match action {
        QuoteAction::Add {
            content,
            author,
            category,
        } => {
            let quote = Quote {
                content,
                author,
                category,
            };
            print_json(&quotes.create(quote).await?)?;
        }
        QuoteAction::List { offline } => {
            if !offline {
                quotes.refresh(false).await;
            }
            print_json(&quotes.view())?;
        }
        QuoteAction::Delete { id } => {
            let id = RecordId::parse(&id);
            if !id.is_local() {
                quotes.refresh(false).await;
            }
            settle(quotes.delete(&id)?).await;
            println!("deleted {id}");
        }
        QuoteAction::Sync => {
            print_json(&quotes.sync_local_only().await)?;
        }
    }
    Ok(())
}
