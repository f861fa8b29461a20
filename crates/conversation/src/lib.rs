//! Crate conversation - Orchestration d'une session conversationnelle temps réel
//!
//! Ce crate relie le canal de transport (`network`) et les pipelines audio
//! (`audio`) : il interprète le protocole du backend, tient la liste des
//! messages et expose les opérations de l'interface.
//!
//! # Architecture
//!
//! - `orchestrator` : connect / disconnect / send_text / toggle_recording et boucle de réception
//! - `state` : état de session explicite et vue publiée à l'interface
//! - `message` : messages et ensemble ordonné indexé par id
//! - `metrics` : métriques dérivées (temps passé, nombre de messages)
//! - `config` : configuration et textes de statut
//!
//! # Example
//!
//! ```rust,no_run
//! use conversation::{ConversationConfig, Orchestrator};
//!
//! # async fn example() -> conversation::ConversationResult<()> {
//! let orchestrator = Orchestrator::with_system_devices(ConversationConfig::default())?;
//! orchestrator.connect("ws://localhost:8080/realtime").await?;
//!
//! orchestrator.toggle_recording().await?; // micro ouvert
//! orchestrator.toggle_recording().await?; // fin d'énoncé
//!
//! println!("Temps passé : {}", orchestrator.metrics().time_spent());
//! orchestrator.disconnect().await;
//! # Ok(())
//! # }
//! ```

pub mod config; // Configuration et textes de statut
pub mod error; // Erreurs de l'orchestrateur
pub mod message; // Messages de la conversation
pub mod metrics; // Métriques de session
pub mod orchestrator; // Orchestrateur
pub mod state; // État de session

mod sink;

pub use config::{ConversationConfig, StatusTexts};
pub use error::{ConversationError, ConversationResult};
pub use message::{Message, MessageSet, Role};
pub use metrics::SessionMetrics;
pub use orchestrator::Orchestrator;
pub use state::{ConnectionStatus, SessionSnapshot, SessionState, SPEECH_PLACEHOLDER};
