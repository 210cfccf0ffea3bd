//! 智能体：通用回答与结果汇总

pub mod general;

pub use general::{render_results, GeneralAgent};
