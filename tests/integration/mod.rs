mod yahoo_client_integration;
