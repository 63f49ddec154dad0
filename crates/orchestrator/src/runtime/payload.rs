//! Dispatcher task payload model.
//!
//! The JSON shape POSTed (base64-encoded in the Cloud Tasks request) from
//! the task queue to the dispatcher, and reused as workflow-dispatch inputs
//! for the CI fallback.

use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use super::batch::BatchPlan;
use super::queue::TableVariant;

#[derive(Clone, Debug, Serialize)]
pub struct TablesBlock {
    pub use_extra_table: bool,
    pub company_table: &'static str,
    pub send_queue_table: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub submissions_table: Option<&'static str>,
}

impl TablesBlock {
    pub fn for_variant(variant: TableVariant) -> Self {
        Self {
            use_extra_table: variant == TableVariant::Extra,
            company_table: variant.company_table(),
            send_queue_table: variant.send_queue_table(),
            submissions_table: variant.submissions_table(),
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct ExecutionBlock {
    pub run_total: u32,
    pub parallelism: u32,
    pub run_index_base: u32,
    pub shards: u32,
    pub workers_per_workflow: u32,
}

#[derive(Clone, Debug, Serialize)]
pub struct DispatchPayload {
    pub execution_id: Uuid,
    pub targeting_id: i64,
    /// Short-lived signed GET URL for the uploaded client config.
    pub client_config_ref: String,
    /// Durable `gs://` path of the same object.
    pub client_config_object: String,
    pub tables: TablesBlock,
    pub execution: ExecutionBlock,
    pub test_mode: bool,
    pub branch: Option<String>,
    pub workflow_trigger: String,
    pub metadata: Value,
    pub mode: String,
    pub dispatcher_mode: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch: Option<BatchPlan>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu_class: Option<&'static str>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn tables_block_per_variant() {
        let t = TablesBlock::for_variant(TableVariant::Primary);
        assert!(!t.use_extra_table);
        assert_eq!(t.send_queue_table, "send_queue");
        assert_eq!(t.company_table, "companies");
        assert!(t.submissions_table.is_none());

        let t = TablesBlock::for_variant(TableVariant::Extra);
        assert!(t.use_extra_table);
        assert_eq!(t.send_queue_table, "send_queue_extra");
        assert_eq!(t.company_table, "companies_extra");

        let t = TablesBlock::for_variant(TableVariant::Test);
        assert_eq!(t.send_queue_table, "send_queue_test");
        assert_eq!(t.submissions_table, Some("submissions_test"));
    }

    #[test]
    fn payload_serializes_optional_blocks_only_when_present() {
        let payload = DispatchPayload {
            execution_id: Uuid::nil(),
            targeting_id: 9,
            client_config_ref: "https://signed".into(),
            client_config_object: "gs://bucket/obj".into(),
            tables: TablesBlock::for_variant(TableVariant::Primary),
            execution: ExecutionBlock {
                run_total: 2,
                parallelism: 2,
                run_index_base: 0,
                shards: 8,
                workers_per_workflow: 1,
            },
            test_mode: false,
            branch: None,
            workflow_trigger: "automated".into(),
            metadata: json!({ "gas_trigger": "form_sender_at_7" }),
            mode: "cloud_run".into(),
            dispatcher_mode: "cloud_run".into(),
            batch: None,
            cpu_class: None,
        };
        let v = serde_json::to_value(&payload).unwrap();
        assert!(v.get("batch").is_none());
        assert!(v.get("cpu_class").is_none());
        assert_eq!(v["execution"]["run_total"], 2);
        assert_eq!(v["branch"], Value::Null);
        assert_eq!(v["tables"]["send_queue_table"], "send_queue");
    }
}
