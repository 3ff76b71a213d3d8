use std::io::Write;
use std::sync::Arc;

use alloy_primitives::U256;
use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::client::intent::format_amount;
use crate::client::{
    ChatController, ChatStatus, ChatUpdate, FileConversationStore, GatewayClient, Sender,
    TxHash, WalletSigner,
};
use crate::dirs;
use crate::error::{GatewayError, Result};
use crate::format::format_number;
use crate::types::WalletTransaction;

const HELP: &str = "\
Commands:
  /new                 start a new conversation
  /yes, /no            answer a pending confirmation
  /mcp [id]            list MCP servers or select one
  /send <to> <amount>  ask the backend to build a transfer
  /tx                  show the pending transaction
  /sign <hash>         record the hash after sending the pending transaction
  /quit                exit";

/// Execute the `chat` command: interactive session against a running gateway.
pub async fn execute(gateway: &str, wallet: Option<String>, mcp: Option<&str>) -> Result<()> {
    let store = Arc::new(FileConversationStore::new(dirs::conversation_path()));
    let controller = ChatController::new(GatewayClient::new(gateway), store)?;
    controller.set_wallet_address(wallet);
    if let Some(mcp) = mcp {
        controller.select_mcp(mcp)?;
    }

    let printer = tokio::spawn(print_updates(controller.clone()));

    println!("Connected to {gateway} (MCP: {})", controller.selected_mcp().name);
    println!("Conversation {}", controller.conversation_id());
    println!("Type /help for commands, Ctrl+C cancels a running answer");
    for message in controller.messages() {
        println!("{}", message.content);
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        prompt();
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let result = match line.split_whitespace().collect::<Vec<_>>().as_slice() {
            ["/quit"] | ["/exit"] => break,
            ["/help"] => {
                println!("{HELP}");
                Ok(())
            }
            ["/new"] => controller.reset().map(|_| ()),
            ["/yes"] => controller.confirm_interrupt(true).await,
            ["/no"] => controller.confirm_interrupt(false).await,
            ["/mcp"] => {
                list_servers(&controller);
                Ok(())
            }
            ["/mcp", id] => controller.select_mcp(id),
            ["/send", to, amount] => controller.request_transaction(to, amount).await.map(|_| ()),
            ["/tx"] => {
                show_pending(&controller);
                Ok(())
            }
            ["/sign", hash] => sign_with_hash(&controller, hash).await,
            [command, ..] if command.starts_with('/') => {
                println!("Unknown command {command}, try /help");
                Ok(())
            }
            _ => send_cancellable(&controller, line).await,
        };

        if let Err(e) = result {
            println!("Error: {e}");
        }
    }

    printer.abort();
    Ok(())
}

async fn send_cancellable(controller: &ChatController, input: &str) -> Result<()> {
    let cancel = CancellationToken::new();
    let ctrl_c = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        })
    };

    let result = controller.send_with_cancel(input, cancel).await;
    ctrl_c.abort();
    result.map(|_| ())
}

/// Signer for transactions sent with an external wallet; it only reports the pasted hash.
struct PastedHashSigner {
    address: String,
    hash: String,
}

#[async_trait]
impl WalletSigner for PastedHashSigner {
    fn address(&self) -> &str {
        &self.address
    }

    async fn sign_and_send(&self, tx: &WalletTransaction) -> Result<TxHash> {
        if !self.hash.starts_with("0x") {
            return Err(GatewayError::Wallet(format!(
                "'{}' is not a transaction hash",
                self.hash
            )));
        }
        tracing::debug!(to = %tx.to, hash = %self.hash, "Recording externally sent transaction");
        Ok(self.hash.clone())
    }
}

async fn sign_with_hash(controller: &ChatController, hash: &str) -> Result<()> {
    let signer = PastedHashSigner {
        address: controller.wallet_address().unwrap_or_default(),
        hash: hash.to_string(),
    };
    controller.sign_pending_transaction(&signer).await.map(|_| ())
}

fn list_servers(controller: &ChatController) {
    let selected = controller.selected_mcp().id;
    for server in controller.mcp_servers() {
        let marker = if server.id == selected { "*" } else { " " };
        let note = if server.coming_soon { " (coming soon)" } else { "" };
        println!("{marker} {:<10} {}{note}", server.id, server.description);
    }
}

fn show_pending(controller: &ChatController) {
    match controller.pending_transaction() {
        Some(pending) => match serde_json::to_string_pretty(&pending.tx) {
            Ok(json) => println!("{json}"),
            Err(e) => println!("Error: {e}"),
        },
        None => println!("No transaction is pending"),
    }
}

fn prompt() {
    print!("> ");
    let _ = std::io::stdout().flush();
}

async fn print_updates(controller: ChatController) {
    let mut updates = BroadcastStream::new(controller.subscribe());
    while let Some(update) = updates.next().await {
        match update {
            Ok(update) => render(&update),
            Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Chat output fell behind");
            }
        }
    }
}

fn render(update: &ChatUpdate) {
    match update {
        ChatUpdate::Delta { text, .. } => {
            print!("{text}");
            let _ = std::io::stdout().flush();
        }
        ChatUpdate::MessageAdded { message }
            if message.sender == Sender::Bot && !message.content.is_empty() =>
        {
            println!("{}", message.content);
        }
        ChatUpdate::MessageCancelled { .. } => println!(" (cancelled)"),
        ChatUpdate::Status {
            status: ChatStatus::Ready | ChatStatus::AwaitingConfirmation,
        } => println!(),
        ChatUpdate::Interrupt { interrupt } => {
            let message = interrupt
                .message
                .as_deref()
                .unwrap_or("The assistant needs your confirmation");
            println!("\n[confirmation needed] {message} (/yes or /no)");
        }
        ChatUpdate::Transaction { pending } => {
            let amount = pending
                .tx
                .value
                .parse::<U256>()
                .ok()
                .and_then(|wei| format_amount(wei).ok())
                .and_then(|ip| ip.parse::<f64>().ok())
                .map(format_number)
                .unwrap_or_else(|| pending.tx.value.clone());
            println!(
                "\n[transaction pending] {amount} IP to {} (/tx to view, /sign <hash> once sent)",
                pending.tx.to
            );
        }
        ChatUpdate::Reset { conversation_id } => {
            println!("Started new conversation {conversation_id}");
        }
        _ => {}
    }
}
