pub mod helpers;

mod tests_corruption;
mod tests_descriptor;
mod tests_refs;
