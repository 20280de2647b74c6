mod pipeline_integration_tests;
