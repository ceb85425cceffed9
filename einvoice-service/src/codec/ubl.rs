//! UBL 2.1 invoice (PEPPOL BIS Billing 3.0) rendering.

use super::format::{escape_xml, format_amount, format_percent, format_quantity};
use crate::models::order::non_blank;
use crate::models::{Allowance, ComputedInvoice, ComputedLine, Party};

const NS_INVOICE: &str = "urn:oasis:names:specification:ubl:schema:xsd:Invoice-2";
const NS_CAC: &str = "urn:oasis:names:specification:ubl:schema:xsd:CommonAggregateComponents-2";
const NS_CBC: &str = "urn:oasis:names:specification:ubl:schema:xsd:CommonBasicComponents-2";
const CUSTOMIZATION_ID: &str = "urn:cen.eu:en16931:2017";
const PROFILE_ID: &str = "urn:fdc:peppol.eu:poacc:billing:3.0";
const INVOICE_TYPE_CODE: &str = "380";

/// Indented element writer. Callers balance `open`/`close`.
struct XmlWriter {
    buf: String,
    depth: usize,
}

impl XmlWriter {
    fn new() -> Self {
        Self {
            buf: String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n"),
            depth: 0,
        }
    }

    fn indent(&mut self) {
        for _ in 0..self.depth {
            self.buf.push_str("  ");
        }
    }

    fn start_tag(&mut self, name: &str, attrs: &[(&str, &str)]) {
        self.indent();
        self.buf.push('<');
        self.buf.push_str(name);
        for (key, value) in attrs {
            self.buf.push(' ');
            self.buf.push_str(key);
            self.buf.push_str("=\"");
            self.buf.push_str(&escape_xml(value));
            self.buf.push('"');
        }
        self.buf.push('>');
    }

    fn open(&mut self, name: &str, attrs: &[(&str, &str)]) {
        self.start_tag(name, attrs);
        self.buf.push('\n');
        self.depth += 1;
    }

    fn close(&mut self, name: &str) {
        self.depth -= 1;
        self.indent();
        self.buf.push_str("</");
        self.buf.push_str(name);
        self.buf.push_str(">\n");
    }

    fn leaf_with(&mut self, name: &str, attrs: &[(&str, &str)], text: &str) {
        self.start_tag(name, attrs);
        self.buf.push_str(&escape_xml(text));
        self.buf.push_str("</");
        self.buf.push_str(name);
        self.buf.push_str(">\n");
    }

    fn leaf(&mut self, name: &str, text: &str) {
        self.leaf_with(name, &[], text);
    }

    fn optional_leaf(&mut self, name: &str, text: &Option<String>) {
        if let Some(text) = non_blank(text) {
            self.leaf(name, text);
        }
    }

    fn amount(&mut self, name: &str, currency: &str, minor: i64, minor_unit: u32) {
        self.leaf_with(
            name,
            &[("currencyID", currency)],
            &format_amount(minor, minor_unit),
        );
    }

    fn tax_scheme(&mut self) {
        self.open("cac:TaxScheme", &[]);
        self.leaf("cbc:ID", "VAT");
        self.close("cac:TaxScheme");
    }

    fn finish(self) -> String {
        self.buf
    }
}

fn write_party(xml: &mut XmlWriter, party: &Party) {
    if let Some(endpoint) = &party.endpoint {
        if let Some(id) = non_blank(&endpoint.id) {
            let scheme = non_blank(&endpoint.scheme).unwrap_or_default();
            xml.leaf_with("cbc:EndpointID", &[("schemeID", scheme)], id);
        }
    }

    xml.open("cac:PartyName", &[]);
    xml.leaf("cbc:Name", &party.name);
    xml.close("cac:PartyName");

    if let Some(address) = &party.address {
        xml.open("cac:PostalAddress", &[]);
        xml.optional_leaf("cbc:StreetName", &address.street_name);
        xml.optional_leaf("cbc:AdditionalStreetName", &address.additional_street_name);
        xml.optional_leaf("cbc:BuildingNumber", &address.building_number);
        xml.optional_leaf("cbc:CityName", &address.city_name);
        xml.optional_leaf("cbc:PostalZone", &address.postal_zone);
        if let Some(country) = non_blank(&address.country_code) {
            xml.open("cac:Country", &[]);
            xml.leaf("cbc:IdentificationCode", country);
            xml.close("cac:Country");
        }
        xml.close("cac:PostalAddress");
    }

    if let Some(company_id) = non_blank(&party.company_id) {
        xml.open("cac:PartyIdentification", &[]);
        xml.leaf("cbc:ID", company_id);
        xml.close("cac:PartyIdentification");
    }

    xml.open("cac:PartyLegalEntity", &[]);
    let legal_name = non_blank(&party.registration_name).unwrap_or(party.name.as_str());
    xml.leaf("cbc:RegistrationName", legal_name);
    xml.close("cac:PartyLegalEntity");

    if let Some(vat_id) = non_blank(&party.vat_id) {
        xml.open("cac:PartyTaxScheme", &[]);
        xml.leaf("cbc:CompanyID", vat_id);
        xml.tax_scheme();
        xml.close("cac:PartyTaxScheme");
    }

    if let Some(contact) = party.contact.as_ref().filter(|c| !c.is_empty()) {
        xml.open("cac:Contact", &[]);
        xml.optional_leaf("cbc:Name", &contact.name);
        xml.optional_leaf("cbc:Telephone", &contact.telephone);
        xml.optional_leaf("cbc:ElectronicMail", &contact.electronic_mail);
        xml.close("cac:Contact");
    }
}

fn write_allowance(xml: &mut XmlWriter, allowance: &Allowance, currency: &str, unit: u32) {
    xml.open("cac:AllowanceCharge", &[]);
    xml.leaf("cbc:ChargeIndicator", "false");
    xml.optional_leaf("cbc:AllowanceChargeReason", &allowance.reason);
    xml.amount("cbc:Amount", currency, allowance.amount_minor, unit);
    if let Some(base) = allowance.base_amount_minor {
        xml.amount("cbc:BaseAmount", currency, base, unit);
    }
    xml.close("cac:AllowanceCharge");
}

fn write_line(xml: &mut XmlWriter, line: &ComputedLine, currency: &str, unit: u32) {
    xml.open("cac:InvoiceLine", &[]);
    xml.leaf("cbc:ID", &line.id);
    xml.leaf_with(
        "cbc:InvoicedQuantity",
        &[("unitCode", line.unit_code.as_str())],
        &format_quantity(line.quantity),
    );
    xml.amount("cbc:LineExtensionAmount", currency, line.net_minor, unit);

    if line.discount_minor > 0 {
        xml.open("cac:AllowanceCharge", &[]);
        xml.leaf("cbc:ChargeIndicator", "false");
        xml.amount("cbc:Amount", currency, line.discount_minor, unit);
        xml.amount("cbc:BaseAmount", currency, line.gross_minor, unit);
        xml.close("cac:AllowanceCharge");
    }

    xml.open("cac:Item", &[]);
    xml.leaf("cbc:Description", &line.description);
    xml.optional_leaf("cbc:Name", &line.item_name);
    xml.open("cac:ClassifiedTaxCategory", &[]);
    xml.leaf("cbc:ID", line.vat_category.as_str());
    xml.leaf("cbc:Percent", &format_percent(line.vat_rate));
    if line.vat_rate == 0 {
        xml.optional_leaf("cbc:TaxExemptionReason", &line.exemption_reason);
    }
    xml.tax_scheme();
    xml.close("cac:ClassifiedTaxCategory");
    xml.close("cac:Item");

    xml.open("cac:Price", &[]);
    xml.amount("cbc:PriceAmount", currency, line.unit_net_minor(), unit);
    xml.close("cac:Price");

    xml.close("cac:InvoiceLine");
}

/// Render the invoice as a UBL 2.1 XML document.
pub fn render_ubl(invoice: &ComputedInvoice) -> String {
    let order = &invoice.order;
    let currency = invoice.currency();
    let unit = invoice.minor_unit;
    let totals = &invoice.totals;
    let mut xml = XmlWriter::new();

    xml.open(
        "Invoice",
        &[
            ("xmlns", NS_INVOICE),
            ("xmlns:cac", NS_CAC),
            ("xmlns:cbc", NS_CBC),
        ],
    );
    xml.leaf("cbc:CustomizationID", CUSTOMIZATION_ID);
    xml.leaf("cbc:ProfileID", PROFILE_ID);
    xml.leaf("cbc:ID", &order.order_number);
    xml.leaf("cbc:IssueDate", &invoice.issue_date.format("%Y-%m-%d").to_string());
    if let Some(due) = order.due_date {
        xml.leaf("cbc:DueDate", &due.format("%Y-%m-%d").to_string());
    }
    xml.leaf("cbc:InvoiceTypeCode", INVOICE_TYPE_CODE);
    xml.leaf("cbc:DocumentCurrencyCode", currency);
    xml.optional_leaf("cbc:BuyerReference", &order.buyer_reference);

    if let Some(reference) = non_blank(&order.order_reference) {
        xml.open("cac:OrderReference", &[]);
        xml.leaf("cbc:ID", reference);
        xml.close("cac:OrderReference");
    }

    for note in order.notes() {
        xml.leaf("cbc:Note", &note);
    }

    if let Some(terms) = order.payment_terms() {
        xml.open("cac:PaymentTerms", &[]);
        xml.leaf("cbc:Note", terms);
        xml.close("cac:PaymentTerms");
    }

    xml.open("cac:AccountingSupplierParty", &[]);
    xml.open("cac:Party", &[]);
    write_party(&mut xml, &order.supplier);
    xml.close("cac:Party");
    xml.close("cac:AccountingSupplierParty");

    xml.open("cac:AccountingCustomerParty", &[]);
    xml.open("cac:Party", &[]);
    write_party(&mut xml, &order.buyer);
    xml.close("cac:Party");
    xml.close("cac:AccountingCustomerParty");

    for allowance in &order.allowances {
        write_allowance(&mut xml, allowance, currency, unit);
    }

    for line in &invoice.lines {
        write_line(&mut xml, line, currency, unit);
    }

    xml.open("cac:TaxTotal", &[]);
    xml.amount("cbc:TaxAmount", currency, totals.tax_total_minor, unit);
    for group in &invoice.tax_groups {
        xml.open("cac:TaxSubtotal", &[]);
        xml.amount("cbc:TaxableAmount", currency, group.taxable_minor, unit);
        xml.amount("cbc:TaxAmount", currency, group.tax_minor, unit);
        xml.open("cac:TaxCategory", &[]);
        xml.leaf("cbc:ID", group.category.as_str());
        xml.leaf("cbc:Percent", &format_percent(group.rate));
        if group.rate == 0 {
            xml.optional_leaf("cbc:TaxExemptionReason", &group.exemption_reason);
        }
        xml.tax_scheme();
        xml.close("cac:TaxCategory");
        xml.close("cac:TaxSubtotal");
    }
    xml.close("cac:TaxTotal");

    xml.open("cac:LegalMonetaryTotal", &[]);
    xml.amount("cbc:LineExtensionAmount", currency, totals.line_extension_minor, unit);
    xml.amount("cbc:TaxExclusiveAmount", currency, totals.tax_exclusive_minor, unit);
    xml.amount("cbc:TaxInclusiveAmount", currency, totals.tax_inclusive_minor, unit);
    if totals.allowance_total_minor > 0 {
        xml.amount("cbc:AllowanceTotalAmount", currency, totals.allowance_total_minor, unit);
    }
    if totals.rounding_minor != 0 {
        xml.amount("cbc:PayableRoundingAmount", currency, totals.rounding_minor, unit);
    }
    xml.amount("cbc:PayableAmount", currency, totals.payable_minor, unit);
    xml.close("cac:LegalMonetaryTotal");

    xml.close("Invoice");
    xml.finish()
}
