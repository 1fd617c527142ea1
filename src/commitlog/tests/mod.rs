mod tests_discard;
mod tests_replay;
