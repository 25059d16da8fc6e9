pub mod calculator;
pub mod external;
pub mod optimizers;
pub mod relax;
pub mod trajectory;
