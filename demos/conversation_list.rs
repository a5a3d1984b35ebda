use std::error::Error;
use std::sync::Arc;

use cookbook_chat_sdk::api::{base_url_from_env, ApiClient};
use cookbook_chat_sdk::conversation::ConversationBook;
use cookbook_chat_sdk::credentials::MemoryCredentialStore;
use secrecy::SecretString;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let token = std::env::var("COOKBOOK_TOKEN").unwrap_or_else(|_| "REPLACE_WITH_TOKEN".to_string());

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        let credentials = Arc::new(MemoryCredentialStore::with_credential(SecretString::new(token)));
        let api = ApiClient::new(format!("{}/api", base_url_from_env()), credentials)?;

        let records = api.conversation_list().await?;
        let mut book = ConversationBook::new();
        book.load_records(&records);

        let ids: Vec<String> = book.conversations().iter().map(|c| c.id.clone()).collect();
        for id in &ids {
            book.load_history(id, &records);
        }
        for conversation in book.conversations() {
            println!(
                "{} {} ({} messages, updated {})",
                conversation.id,
                conversation.title,
                book.messages(&conversation.id).len(),
                conversation.update_time,
            );
        }

        Ok::<(), Box<dyn Error>>(())
    })
}
