//! Reduces raw APM aggregation results to the stats handed to callers.
//!
//! The per-minute time series is only used to compute the average throughput
//! and is dropped afterwards; the output types have no field for it.

use crate::models::{
    ApmGroupBy, ApmServiceBucket, ApmStats, GroupedApmStats, RawApmStats, RawGroupedApmStats,
    Timeseries,
};

/// Mean of the per-minute throughput values. A missing or empty series
/// yields `0.0`; a bucket whose rate is null counts as zero.
pub fn average_throughput(timeseries: Option<&Timeseries>) -> f64 {
    let buckets = match timeseries {
        Some(series) if !series.buckets.is_empty() => &series.buckets,
        _ => return 0.0,
    };

    let sum: f64 = buckets
        .iter()
        .map(|bucket| bucket.throughput.value.unwrap_or(0.0))
        .sum();
    sum / buckets.len() as f64
}

pub fn summarize_single(raw: RawApmStats) -> ApmStats {
    ApmStats {
        throughput: average_throughput(raw.timeseries.as_ref()),
        failure_rate: raw.failure_rate,
        latency: raw.latency,
    }
}

pub fn summarize_grouped(raw: RawGroupedApmStats) -> GroupedApmStats {
    let group = raw.group_by_service_name;
    let buckets = group
        .buckets
        .into_iter()
        .map(|bucket| ApmServiceBucket {
            throughput: average_throughput(bucket.timeseries.as_ref()),
            key: bucket.key,
            doc_count: bucket.doc_count,
            failure_rate: bucket.failure_rate,
            latency: bucket.latency,
        })
        .collect();

    GroupedApmStats {
        group_by_service_name: ApmGroupBy {
            doc_count_error_upper_bound: group.doc_count_error_upper_bound,
            sum_other_doc_count: group.sum_other_doc_count,
            buckets,
        },
    }
}
