mod chart;

pub use chart::*;
