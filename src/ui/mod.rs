//! 交互入口：命令行下载（`cli`）与 Web 控制面（`web`）。

pub mod cli;
pub mod web;
