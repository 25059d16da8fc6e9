pub mod state;
pub mod ui;
