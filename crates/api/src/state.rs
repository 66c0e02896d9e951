use std::sync::Arc;

use obrolan_domain::chat::ChatService;
use obrolan_domain::messages::MessageService;
use obrolan_domain::ports::auth::IdentityGate;
use obrolan_domain::ports::chat::ChatRepository;
use obrolan_domain::ports::db::StoreProbe;
use obrolan_domain::ports::messages::MessageRepository;
use obrolan_domain::ports::users::UserDirectory;
use obrolan_domain::users::AccountService;
use obrolan_infra::auth::JwtIdentityGate;
use obrolan_infra::config::AppConfig;
use obrolan_infra::db::{self, DbConfig, MemoryProbe, SurrealProbe};
use obrolan_infra::password::Argon2PasswordHasher;
use obrolan_infra::repositories::{
    InMemoryChatRepository, InMemoryMessageRepository, InMemoryUserDirectory,
    SurrealChatRepository, SurrealMessageRepository, SurrealUserDirectory, ensure_schema,
};

use crate::realtime::RealtimeHub;

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub chats: ChatService,
    pub messages: MessageService,
    pub accounts: AccountService,
    pub users: Arc<dyn UserDirectory>,
    pub identity: Arc<dyn IdentityGate>,
    pub realtime: RealtimeHub,
    pub store: Arc<dyn StoreProbe>,
}

impl AppState {
    pub async fn new(config: AppConfig) -> anyhow::Result<Self> {
        let identity: Arc<dyn IdentityGate> = Arc::new(JwtIdentityGate::from_app_config(&config));
        if config.uses_surreal() {
            let db_config = DbConfig::from_app_config(&config);
            let client = db::connect(&db_config).await?;
            ensure_schema(&client).await?;
            return Ok(Self::with_components(
                config,
                Arc::new(SurrealChatRepository::with_client(client.clone())),
                Arc::new(SurrealMessageRepository::with_client(client.clone())),
                Arc::new(SurrealUserDirectory::with_client(client)),
                identity,
                Arc::new(SurrealProbe::new(db_config)),
            ));
        }

        tracing::warn!(
            data_backend = %config.data_backend,
            "using in-memory stores; accounts live until the process exits"
        );
        Ok(Self::with_components(
            config,
            Arc::new(InMemoryChatRepository::new()),
            Arc::new(InMemoryMessageRepository::new()),
            Arc::new(InMemoryUserDirectory::new()),
            identity,
            Arc::new(MemoryProbe),
        ))
    }

    pub fn with_components(
        config: AppConfig,
        chat_repo: Arc<dyn ChatRepository>,
        message_repo: Arc<dyn MessageRepository>,
        users: Arc<dyn UserDirectory>,
        identity: Arc<dyn IdentityGate>,
        store: Arc<dyn StoreProbe>,
    ) -> Self {
        let chats = ChatService::new(chat_repo, users.clone());
        let messages = MessageService::new(message_repo, chats.clone());
        let accounts = AccountService::new(
            users.clone(),
            identity.clone(),
            Arc::new(Argon2PasswordHasher::new()),
        );
        Self {
            config,
            chats,
            messages,
            accounts,
            users,
            identity,
            realtime: RealtimeHub::new(),
            store,
        }
    }
}
