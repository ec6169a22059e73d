pub mod assembler;
pub mod catalog;
pub mod content;
pub mod domain;
pub mod memory;
pub mod ports;

pub use assembler::{AssemblyError, DocumentAssembler, PresentationData, ProgressSink};
pub use catalog::TemplateVariant;
pub use content::{ContentGenerator, ExpectedShape, Generated, GenerationError, RetryObserver, RetryPolicy};
pub use domain::{
    Artifact, BalanceEntry, ChatId, DebitOutcome, EntryKind, Keyboard, MessageId, NewUser,
    PresentationRecord, TemplateId, User, UserId, UserStats,
};
pub use ports::{
    DocumentRenderer, LedgerService, MessagingService, PortError, PortResult, ProviderError,
    TextGenerationService, UserRepository,
};
