mod history;
mod session;


pub use history::SearchHistory;
pub use session::{SearchOutcome, SearchSession};
