use std::error::Error;
use std::io::Write;
use std::sync::Arc;

use cookbook_chat_sdk::api::base_url_from_env;
use cookbook_chat_sdk::credentials::MemoryCredentialStore;
use cookbook_chat_sdk::stream::client::ChatStreamClient;
use cookbook_chat_sdk::stream::proto::StreamRequest;
use secrecy::SecretString;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let token = std::env::var("COOKBOOK_TOKEN").unwrap_or_else(|_| "REPLACE_WITH_TOKEN".to_string());
    let message = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "What can I cook with leftover rice?".to_string());

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        let credentials = Arc::new(MemoryCredentialStore::with_credential(SecretString::new(token)));
        let client = ChatStreamClient::new(format!("{}/api", base_url_from_env()), credentials)?;

        let session = client.open_stream(
            StreamRequest::agent(Uuid::new_v4().to_string(), message),
            |thinking| eprintln!("[thinking] {thinking}"),
            |content| {
                print!("{content}");
                let _ = std::io::stdout().flush();
            },
        )?;

        let closer = session.closer();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                closer.close();
            }
        });

        session.finish().await?;
        println!();
        Ok::<(), Box<dyn Error>>(())
    })
}
