mod sslcheck;
