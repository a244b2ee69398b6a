//! Pure read-side analytics. Every function takes its population and an
//! explicit `now`; nothing reads the clock or shared state.

pub mod achievements;
pub mod aggregation;
pub mod cohorts;
mod filters;
pub mod health;
pub mod ranking;
pub mod risk;
pub mod status;
pub mod timeseries;

pub use achievements::{
    achievement_distribution, achievement_funnel, achievement_report, wallet_profiles,
    AchievementFunnel, AchievementReport, AchievementStats, AchievementType, WalletProfile,
};
pub use aggregation::{
    calculate_distribution, dormancy_distribution, portfolio_stats, tier_distribution,
    vesting_distribution, DistributionReport, GroupStats, PortfolioStats, TierDistribution,
    VestingDistribution,
};
pub use cohorts::{
    build_cohort_analysis, retention_matrix, Cohort, CohortAnalysis, CohortId, RetentionMatrix,
    RetentionRow,
};
pub use filters::{filter_vaults, ScopeFilter, SeparationFilter, VaultFilter, VestingFilter};
pub use health::{calculate_ecosystem_health, EcosystemHealth};
pub use ranking::{
    build_analytics_result, get_vault_ranking, leaderboard, percentile, percentile_thresholds,
    rank_vaults, AnalyticsResult, DisplaySort, Pagination, RankedVault, RankingOptions,
    SortField, SortOrder, Tier, TierCutoff, TierThreshold,
};
pub use risk::{
    analyze_dormancy_risks, collateral_at_risk, dormancy_risk, DormancyRisk, RiskLevel,
    RiskThresholds,
};
pub use status::{derive_status, dormancy_state, is_separated, is_vested, VaultStatus};
pub use timeseries::{
    build_time_series, growth_rates, moving_average, Interval, SeriesKind, SeriesPoint,
    TimeSeries,
};
