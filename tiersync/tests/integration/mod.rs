mod load_strategies_test;
mod pipeline_test;
mod resilience_test;
mod schema_test;
