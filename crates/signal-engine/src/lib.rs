pub mod fusion;
pub mod validator;


pub use fusion::{
    rank_signals, FusionConfig, FusionOutcome, InstrumentSnapshot, RejectedSignal,
    SignalFusionEngine, SignalHistory, StrategyPolicy,
};
pub use validator::{take_profit_ladder, EntryExitConfig, EntryExitValidator, EntryValidation};
