mod projects;
mod tm_entries;
mod workflows;
