// HTTP trading-surface interface.

pub mod rest;
