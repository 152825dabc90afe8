#[path = "sync/end_to_end.rs"]
mod end_to_end;
