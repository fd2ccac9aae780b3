use std::{path::Path, sync::Arc};

use crate::{
    evaluation_logger::NoopEvaluationLogger, file_store::FileStore, store::MemoryStore, Client,
    EvaluationLogger, FlagStore, Result,
};

/// Configuration for [`Client`].
pub struct ClientConfig<'a> {
    pub(crate) store: Arc<dyn FlagStore>,
    pub(crate) evaluation_logger: Box<dyn EvaluationLogger + Send + Sync + 'a>,
}

impl<'a> ClientConfig<'a> {
    /// Create a configuration backed by an empty in-memory catalog.
    ///
    /// ```
    /// # use switchboard::ClientConfig;
    /// let client = ClientConfig::in_memory().to_client();
    /// assert!(client.list_flags().unwrap().is_empty());
    /// ```
    pub fn in_memory() -> Self {
        ClientConfig::from_store(Arc::new(MemoryStore::new()))
    }

    /// Create a configuration using the given storage backend.
    pub fn from_store(store: Arc<dyn FlagStore>) -> Self {
        ClientConfig {
            store,
            evaluation_logger: Box::new(NoopEvaluationLogger),
        }
    }

    /// Create a configuration backed by the JSON catalog document at `path`.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        Ok(ClientConfig::from_store(Arc::new(FileStore::open(path)?)))
    }

    /// Set a logger that receives every successful evaluation.
    ///
    /// ```
    /// # use switchboard::{ClientConfig, EvaluationEvent};
    /// let mut config = ClientConfig::in_memory();
    /// config.evaluation_logger(|event: EvaluationEvent| {
    ///   println!("{:?}", event);
    /// });
    /// ```
    pub fn evaluation_logger(
        &mut self,
        evaluation_logger: impl EvaluationLogger + Send + Sync + 'a,
    ) -> &mut Self {
        self.evaluation_logger = Box::new(evaluation_logger);
        self
    }

    /// Create a new [`Client`] using the specified configuration.
    pub fn to_client(self) -> Client<'a> {
        Client::new(self)
    }
}
