pub mod end_watcher;
