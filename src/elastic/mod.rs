pub mod client;
pub mod provider;
pub mod query;
pub mod summary;

pub use client::{ApiResponse, ElasticClient};
pub use provider::{
    ApmMultiStatsRequest, ApmStatsRequest, DefaultElasticInfoProvider, ElasticInfoProvider,
    SloRequest, SlosRequest,
};
pub use query::{build_apm_query, ApmRequest, FilterClause};
pub use summary::{summarize_grouped, summarize_single};
