//! Backend resources exposed by the console.

use crate::resource::ResourceDescriptor;

pub const CALENDARS: ResourceDescriptor =
    ResourceDescriptor::new("calendar", "calendars", "calendars", "Calendar");
pub const CATEGORIES: ResourceDescriptor =
    ResourceDescriptor::new("calendar", "categories", "categories", "Category");
pub const EVENTS: ResourceDescriptor =
    ResourceDescriptor::new("calendar", "events", "events", "Event");

pub const STUDENTS: ResourceDescriptor =
    ResourceDescriptor::new("students", "students", "students", "Student");
pub const EXAMS: ResourceDescriptor = ResourceDescriptor::new("exams", "exams", "exams", "Exam");
pub const HOSTEL_ROOMS: ResourceDescriptor =
    ResourceDescriptor::new("hostel", "rooms", "hostel-rooms", "Room");
pub const EMPLOYEES: ResourceDescriptor =
    ResourceDescriptor::new("hr", "employees", "employees", "Employee");
pub const INVENTORY_ITEMS: ResourceDescriptor =
    ResourceDescriptor::new("inventory", "items", "inventory-items", "Item");
pub const TRANSPORT_ROUTES: ResourceDescriptor =
    ResourceDescriptor::new("transport", "routes", "transport-routes", "Route");
pub const LIBRARY_BOOKS: ResourceDescriptor =
    ResourceDescriptor::new("library", "books", "library-books", "Book");
pub const COURSES: ResourceDescriptor =
    ResourceDescriptor::new("lms", "courses", "courses", "Course");
pub const CMS_PAGES: ResourceDescriptor =
    ResourceDescriptor::new("cms", "pages", "cms-pages", "Page");
pub const NOTIFICATIONS: ResourceDescriptor = ResourceDescriptor::new(
    "notifications",
    "notifications",
    "notifications",
    "Notification",
);
pub const REPORTS: ResourceDescriptor =
    ResourceDescriptor::new("reports", "reports", "reports", "Report");
pub const SETTINGS: ResourceDescriptor =
    ResourceDescriptor::new("settings", "settings", "settings", "Setting");

/// Every resource, in display order.
pub const ALL: &[ResourceDescriptor] = &[
    CALENDARS,
    CATEGORIES,
    EVENTS,
    STUDENTS,
    EXAMS,
    HOSTEL_ROOMS,
    EMPLOYEES,
    INVENTORY_ITEMS,
    TRANSPORT_ROUTES,
    LIBRARY_BOOKS,
    COURSES,
    CMS_PAGES,
    NOTIFICATIONS,
    REPORTS,
    SETTINGS,
];

/// Long-running bulk result processing job (multipart in, JSON or spreadsheet out).
pub const BULK_RESULTS_PATH: &str = "exams/results/bulk-process/";

pub const LOGIN_PATH: &str = "auth/login/";
pub const LOGOUT_PATH: &str = "auth/logout/";

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_namespaces_are_unique() {
        let namespaces: HashSet<_> = ALL.iter().map(|d| d.namespace).collect();
        assert_eq!(namespaces.len(), ALL.len());
    }

    #[test]
    fn test_paths_are_unique() {
        let paths: HashSet<_> = ALL.iter().map(|d| d.collection_path()).collect();
        assert_eq!(paths.len(), ALL.len());
    }
}
