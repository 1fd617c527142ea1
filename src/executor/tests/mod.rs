mod tests_futures;
