mod tests_basic;
mod tests_edge_cases;
mod tests_frozen;
mod tests_scan;

// Priority 3 — hardening (edge cases)
mod tests_hardening;

// Priority 4 — coverage
mod tests_coverage;
