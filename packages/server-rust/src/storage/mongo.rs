//! `MongoDB` storage connector.

use std::time::Duration;

use async_trait::async_trait;
use mongodb::bson::doc;
use mongodb::options::ClientOptions;
use mongodb::{Client, Database};

use super::StorageConnector;

/// Database used when the connection string names none.
pub const DEFAULT_DATABASE: &str = "prj";

/// Connects with the official driver and confirms reachability with `ping`.
#[derive(Debug, Clone)]
pub struct MongoConnector {
    /// How long the driver may search for a suitable server.
    pub server_selection_timeout: Duration,
}

impl Default for MongoConnector {
    fn default() -> Self {
        Self {
            server_selection_timeout: Duration::from_secs(30),
        }
    }
}

#[async_trait]
impl StorageConnector for MongoConnector {
    type Client = Database;

    async fn connect(&self, url: &str) -> anyhow::Result<Database> {
        let mut options = ClientOptions::parse(url).await?;
        options.server_selection_timeout = Some(self.server_selection_timeout);
        options.app_name = Some(env!("CARGO_PKG_NAME").to_string());

        let client = Client::with_options(options)?;
        let database = client
            .default_database()
            .unwrap_or_else(|| client.database(DEFAULT_DATABASE));
        database.run_command(doc! { "ping": 1 }).await?;
        Ok(database)
    }
}
