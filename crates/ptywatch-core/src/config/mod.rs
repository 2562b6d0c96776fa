mod settings;

pub use settings::{
    data_dir, AgentPattern, AuditSettings, ClassifierMode, ClassifierSettings, Settings,
    StoreSettings,
};
