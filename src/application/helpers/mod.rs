pub mod event_normalizer;
