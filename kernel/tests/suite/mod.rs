mod boot;
mod cron_jobs;
mod interrupts;
mod scenarios;
