mod pipeline_tests;
mod retry_tests;
