mod tests_manager;
mod tests_merge;
mod tests_purge;
mod tests_strategies;
