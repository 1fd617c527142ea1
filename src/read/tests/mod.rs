mod tests_range;
