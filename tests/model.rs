#[path = "model/cluster_flow.rs"]
mod cluster_flow;
