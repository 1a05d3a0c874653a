//! # quizmab-algo - 自适应测验核心算法库
//!
//! 本 crate 提供纯 Rust 实现的出题算法:
//!
//! - **Informed Priors** - 按题目难度初始化 Beta 先验
//! - **Forgetting Curve** - 按距上次作答的天数将参数回归先验
//! - **Performance Updater** - 结合答题用时的非对称更新
//! - **Hierarchical Thompson Sampling** - 先选主题、再选题目的两级采样
//! - **Difficulty Classifier** - 基于全局表现的难度分级
//!
//! ## 设计理念
//!
//! - **无 I/O** - 不依赖存储、网络或时钟，时间以毫秒时间戳传入
//! - **可复现** - 随机数通过 [`RandomSource`] 注入，种子固定即结果固定
//! - **不变量优先** - 任何更新结果在返回前都会被校验
//!
//! ## 模块结构
//!
//! - [`types`] - 公共类型和常量
//! - [`config`] - 算法参数
//! - [`prior`] - 难度先验
//! - [`decay`] - 遗忘曲线
//! - [`update`] - 答题结果更新
//! - [`thompson`] - Beta 采样与随机源
//! - [`selector`] - 两级 Thompson 选择
//! - [`difficulty`] - 难度分级
//! - [`sanitize`] - 数据清洗 (数值稳定性、验证)
//!
//! ## 使用示例
//!
//! ```rust
//! use std::collections::{HashMap, HashSet};
//! use quizmab_algo::{ArmCandidate, BanditConfig, Difficulty, HierarchicalSelector, seeded_rng};
//!
//! let selector = HierarchicalSelector::new(&BanditConfig::default());
//! let topics = vec![ArmCandidate::topic("renal_dosage", None)];
//! let mut questions = HashMap::new();
//! questions.insert(
//!     "renal_dosage".to_string(),
//!     vec![ArmCandidate::question("q1", Difficulty::Beginner, None)],
//! );
//!
//! let mut rng = seeded_rng(42);
//! let selection = selector.select_next(&mut rng, &topics, &questions, &HashSet::new(), 0);
//! assert_eq!(selection.question_id(), Some("q1"));
//! ```

// ============================================================================
// 模块声明
// ============================================================================

pub mod config;
pub mod decay;
pub mod difficulty;
pub mod error;
pub mod prior;
pub mod sanitize;
pub mod selector;
pub mod thompson;
pub mod types;
pub mod update;

// ============================================================================
// 重新导出
// ============================================================================

/// 重新导出所有公共类型
pub use types::*;

pub use config::BanditConfig;
pub use error::{BanditError, BanditResult};

/// 重新导出先验与遗忘曲线
pub use decay::{decay_factor, effective_params, elapsed_days};
pub use prior::{initial_prior, initial_prior_for_label, topic_prior};

/// 重新导出更新契约
pub use update::{apply_full_state, apply_outcome, apply_update, ArmUpdate};

/// 重新导出 Thompson 采样
pub use selector::{ArmCandidate, Draw, HierarchicalSelector, SelectedQuestion, Selection};
pub use thompson::{entropy_rng, sample_beta, seeded_rng, RandomSource};

/// 重新导出难度分级
pub use difficulty::{
    classify, composite_difficulty, expected_secs_for, wilson_interval, DifficultyEstimate,
    PerformanceSample,
};
