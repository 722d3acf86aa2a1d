use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DailyEarning {
    pub day: String,
    pub amount: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct DriverStats {
    pub today_earnings: f64,
    pub today_rides: u32,
    pub hours_online: f64,
    pub rating: f64,
    pub weekly_earnings: f64,
    pub monthly_earnings: f64,
    /// Commission owed to the platform.
    pub total_debt: f64,
    /// Gross earnings.
    pub total_earnings: f64,
    pub net_balance: f64,
    pub weekly_data: Vec<DailyEarning>,
}

/// Partial overwrite of [`DriverStats`]; `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatsUpdate {
    pub today_earnings: Option<f64>,
    pub today_rides: Option<u32>,
    pub hours_online: Option<f64>,
    pub rating: Option<f64>,
    pub weekly_earnings: Option<f64>,
    pub monthly_earnings: Option<f64>,
    pub total_debt: Option<f64>,
    pub total_earnings: Option<f64>,
    pub net_balance: Option<f64>,
    pub weekly_data: Option<Vec<DailyEarning>>,
}

impl DriverStats {
    pub fn apply(&mut self, update: StatsUpdate) {
        if let Some(v) = update.today_earnings {
            self.today_earnings = v;
        }
        if let Some(v) = update.today_rides {
            self.today_rides = v;
        }
        if let Some(v) = update.hours_online {
            self.hours_online = v;
        }
        if let Some(v) = update.rating {
            self.rating = v;
        }
        if let Some(v) = update.weekly_earnings {
            self.weekly_earnings = v;
        }
        if let Some(v) = update.monthly_earnings {
            self.monthly_earnings = v;
        }
        if let Some(v) = update.total_debt {
            self.total_debt = v;
        }
        if let Some(v) = update.total_earnings {
            self.total_earnings = v;
        }
        if let Some(v) = update.net_balance {
            self.net_balance = v;
        }
        if let Some(v) = update.weekly_data {
            self.weekly_data = v;
        }
    }

    /// Local estimate after a completed ride, replaced by the next
    /// earnings refresh.
    pub fn record_completed_ride(&mut self, fare: f64, commission: f64) {
        self.today_earnings += fare;
        self.today_rides += 1;
        self.weekly_earnings += fare;
        self.monthly_earnings += fare;
        self.total_earnings += fare;
        self.total_debt += commission;
        self.net_balance = self.total_earnings - self.total_debt;
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct EarningsSummary {
    pub today_earnings: Option<f64>,
    pub today_rides: Option<u32>,
    pub weekly_earnings: Option<f64>,
    pub monthly_earnings: Option<f64>,
    pub total_earnings: Option<f64>,
    pub total_debt: Option<f64>,
    pub net_balance: Option<f64>,
    pub hours_online: Option<f64>,
    pub rating: Option<f64>,
    pub weekly_data: Option<Vec<DailyEarning>>,
}

impl From<EarningsSummary> for StatsUpdate {
    fn from(summary: EarningsSummary) -> Self {
        Self {
            today_earnings: Some(summary.today_earnings.unwrap_or(0.0)),
            today_rides: Some(summary.today_rides.unwrap_or(0)),
            weekly_earnings: Some(summary.weekly_earnings.unwrap_or(0.0)),
            monthly_earnings: Some(summary.monthly_earnings.unwrap_or(0.0)),
            total_earnings: Some(summary.total_earnings.unwrap_or(0.0)),
            total_debt: Some(summary.total_debt.unwrap_or(0.0)),
            net_balance: Some(summary.net_balance.unwrap_or(0.0)),
            hours_online: Some(summary.hours_online.unwrap_or(0.0)),
            rating: summary.rating,
            weekly_data: Some(summary.weekly_data.unwrap_or_default()),
        }
    }
}
