use axum::extract::FromRef;
use url::Url;

use common::engine::Engine;
use common::jobs::{JobDispatcher, JobReceiver};
use common::moderation::Moderator;

use crate::bot::Dispatcher;
use crate::database::{Database, DatabaseSetupError};
use crate::service_config::Config;
use crate::telegram::{BotClient, BotClientError};

/// Main service state - everything the long-running tasks share
#[derive(Clone)]
pub struct State {
    database: Database,
    client: BotClient,
    dispatcher: Dispatcher<Database, BotClient>,
}

impl State {
    /// Connect the database and wire the engine to the Bot API.
    ///
    /// The returned receiver feeds the background job worker.
    pub async fn from_config(config: &Config) -> Result<(Self, JobReceiver), StateSetupError> {
        // 1. Setup database
        let sqlite_database_url = match config.sqlite_path {
            Some(ref path) => {
                // check that the path exists
                if !path.exists() {
                    return Err(StateSetupError::DatabasePathDoesNotExist);
                }
                Url::parse(&format!("sqlite://{}", path.display()))
                    .map_err(|_| StateSetupError::InvalidDatabaseUrl)
            }
            // otherwise just set up an in-memory database
            None => Url::parse("sqlite::memory:").map_err(|_| StateSetupError::InvalidDatabaseUrl),
        }?;
        tracing::info!("Database URL: {:?}", sqlite_database_url);
        let database = Database::connect(&sqlite_database_url).await?;

        // 2. Bot API client
        let client = BotClient::new(&config.api_base_url, &config.bot_token, config.poll_timeout)?;

        Ok(Self::from_parts(config, database, client))
    }

    /// Assemble the state around an already connected database and client
    pub fn from_parts(config: &Config, database: Database, client: BotClient) -> (Self, JobReceiver) {
        let engine = Engine::new(
            database.clone(),
            std::sync::Arc::new(client.clone()),
            config.engine.clone(),
        );
        let moderator = Moderator::new(config.banned_terms.iter().cloned(), config.max_warnings);
        let (jobs, job_receiver) = JobDispatcher::new();
        let dispatcher = Dispatcher::new(engine, moderator, jobs, config.moderation_log_chat);

        let state = Self {
            database,
            client,
            dispatcher,
        };
        (state, job_receiver)
    }

    pub fn database(&self) -> &Database {
        &self.database
    }

    pub fn client(&self) -> &BotClient {
        &self.client
    }

    pub fn dispatcher(&self) -> &Dispatcher<Database, BotClient> {
        &self.dispatcher
    }

    pub fn engine(&self) -> &Engine<Database, BotClient> {
        self.dispatcher.engine()
    }
}

impl FromRef<State> for Database {
    fn from_ref(state: &State) -> Self {
        state.database.clone()
    }
}

impl AsRef<Database> for State {
    fn as_ref(&self) -> &Database {
        self.database()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StateSetupError {
    #[error("Database path does not exist")]
    DatabasePathDoesNotExist,
    #[error("Database setup error")]
    DatabaseSetupError(#[from] DatabaseSetupError),
    #[error("Invalid database URL")]
    InvalidDatabaseUrl,
    #[error("Bot API client setup error: {0}")]
    BotClient(#[from] BotClientError),
}
