mod tests_boundaries;
