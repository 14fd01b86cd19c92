pub mod balance_watcher;
pub mod batch_dispatcher;
pub mod dispersal_session;
pub mod nonce_manager;
pub mod payout_calculator;
pub mod result_aggregator;
pub mod transaction_retry;

pub use balance_watcher::{BalanceChange, BalanceWatcher};
pub use batch_dispatcher::{BatchDispatcher, DispatchReport};
pub use dispersal_session::{DispersalSession, PayoutRequest, SendRequest};
pub use nonce_manager::{NonceAllocation, NonceSequencer};
pub use payout_calculator::{PayoutCalculator, PayoutMode, PayoutPlan};
pub use result_aggregator::{DispersalSummary, FailureRecord, ResultAggregator, SuccessRecord};
pub use transaction_retry::{RetryOutcome, RetryPolicy};
